//! Nodes (pool health, load score, next pick)
//! Tasks (tracked generation tasks, newest first)

use std::{
  error::Error,
  io,
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
  Terminal,
};
use tokio::runtime::Runtime;
use comfy_balancer::{
  config::{Config, SelectionSettings, SharedSettings},
  database::PgStore,
  error::BalancerError,
  forwarder::Forwarder,
  models::{NodeStatus, TaskRecord, TaskStatus, epoch_now},
  registry::NodeRegistry,
  selector::select,
  store::KvStore,
  task_tracker::TaskTracker,
};

struct NodeInfo {
  addr: String,
  healthy: bool,
  cpu_usage: f64,
  gpu_usage: f64,
  score: f64,
  age_secs: f64,
}

#[derive(Clone, Copy)]
enum DashboardTab {
  Nodes,
  Tasks,
}

struct App {
  current_tab: DashboardTab,
  nodes: Vec<NodeInfo>,
  next_pick: String,
  tasks: Vec<TaskRecord>,
  error: Option<String>,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Nodes,
      nodes: vec![],
      next_pick: "N/A".into(),
      tasks: vec![],
      error: None,
    }
  }

  fn toggle_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Nodes => DashboardTab::Tasks,
      DashboardTab::Tasks => DashboardTab::Nodes,
    }
  }
}

fn node_info(node: &NodeStatus, settings: &SelectionSettings, now: f64) -> NodeInfo {
  NodeInfo {
    addr: node.record.addr().to_string(),
    healthy: node.is_healthy,
    cpu_usage: node.record.cpu_usage,
    gpu_usage: node.record.gpu_usage,
    score: settings.score(node.record.gpu_usage, node.record.cpu_usage),
    age_secs: now - node.record.last_update,
  }
}

async fn fetch_state(registry: &NodeRegistry, tracker: &TaskTracker, settings: &SelectionSettings) -> Result<App, BalancerError> {
  let mut app = App::new();
  let now = epoch_now();

  let nodes = registry.list_nodes_at(now).await?;
  app.next_pick = match select(&nodes, settings) {
    Ok(node) => node.record.addr().to_string(),
    Err(e) => e.to_string(),
  };
  app.nodes = nodes.iter().map(|n| node_info(n, settings, now)).collect();
  app.nodes.sort_by(|a, b| a.addr.cmp(&b.addr));

  app.tasks = tracker.list().await?;
  app.tasks.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
  Ok(app)
}

fn main() -> Result<(), Box<dyn Error>> {
  let config = Config::from_env()?;
  let rt = Runtime::new()?;
  let store: Arc<dyn KvStore> = Arc::new(rt.block_on(PgStore::connect(&config.database_url))?);
  let settings = config.selection;
  let registry = NodeRegistry::new(store.clone(), SharedSettings::new(settings));
  let tracker = TaskTracker::new(store, Forwarder::new(config.forward_timeout)?);

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let (tx, rx) = std::sync::mpsc::channel::<App>();

  thread::spawn(move || {
    loop {
      let app_state = rt
        .block_on(fetch_state(&registry, &tracker, &settings))
        .unwrap_or_else(|e| {
          let mut app = App::new();
          app.error = Some(e.to_string());
          app
        });
      if tx.send(app_state).is_err() {
        break;
      }
      thread::sleep(Duration::from_secs(2));
    }
  });

  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    if let Ok(mut new_state) = rx.try_recv() {
      new_state.current_tab = app.current_tab;
      app = new_state;
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right | KeyCode::Left | KeyCode::Tab => app.toggle_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let tab_titles = vec!["Nodes", "Tasks"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Comfy Balancer"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Nodes => 0,
      DashboardTab::Tasks => 1,
    });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Nodes => render_nodes(f, app, chunks[1]),
    DashboardTab::Tasks => render_tasks(f, app, chunks[1]),
  }

  let footer_text = match &app.error {
    Some(e) => format!("Error: {} | ←/→: Switch Tabs | q: Quit", e),
    None => "←/→: Switch Tabs | q: Quit".into(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(Color::White))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_nodes<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(65), Constraint::Percentage(35)].as_ref())
    .split(area);

  let node_items: Vec<ListItem> = app.nodes.iter().map(|n| {
    let (label, color) = if n.healthy { ("healthy", Color::Green) } else { ("stale", Color::Red) };
    let lines = vec![
      Spans::from(vec![
        Span::styled(format!("{} ", n.addr), Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(label, Style::default().fg(color)),
      ]),
      Spans::from(Span::raw(format!("GPU: {:.1}% | CPU: {:.1}% | Score: {:.1}", n.gpu_usage, n.cpu_usage, n.score))),
      Spans::from(Span::raw(format!("Last heartbeat: {:.0}s ago", n.age_secs))),
    ];
    ListItem::new(lines)
  }).collect();
  let nodes_list = List::new(if node_items.is_empty() { vec![ListItem::new(Spans::from(Span::raw("No registered nodes")))] } else { node_items })
    .block(Block::default().borders(Borders::ALL).title(format!("Worker Nodes ({})", app.nodes.len())));
  f.render_widget(nodes_list, chunks[0]);

  let healthy = app.nodes.iter().filter(|n| n.healthy).count();
  let summary = Paragraph::new(vec![
    Spans::from(Span::raw(format!("Healthy: {}/{}", healthy, app.nodes.len()))),
    Spans::from(Span::styled(format!("Next pick: {}", app.next_pick), Style::default().fg(Color::Cyan))),
  ])
    .block(Block::default().borders(Borders::ALL).title("Selection"));
  f.render_widget(summary, chunks[1]);
}

fn render_tasks<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let task_items: Vec<ListItem> = app.tasks.iter().map(|t| {
    let color = match t.status {
      TaskStatus::Pending => Color::Yellow,
      TaskStatus::Success => Color::Green,
      TaskStatus::Error => Color::Red,
    };
    ListItem::new(Spans::from(vec![
      Span::styled(format!("{} ", t.task_id), Style::default().add_modifier(Modifier::BOLD)),
      Span::styled(format!("[{}] ", t.status), Style::default().fg(color)),
      Span::raw(format!("Node: {} | Client: {} | Images: {}", t.node, t.client_id, t.images.len())),
    ]))
  }).collect();
  let header = format!("Tracked Tasks ({})", app.tasks.len());
  let tasks_list = List::new(task_items)
    .block(Block::default().borders(Borders::ALL).title(header));
  f.render_widget(tasks_list, area);
}
