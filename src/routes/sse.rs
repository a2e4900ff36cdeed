use std::time::Duration;

use futures::stream;
use serde_json::json;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::error;
use warp::Filter;
use warp::sse::Event;

use crate::balancer::{Balancer, validate_task_id};
use crate::error::BalancerError;
use crate::models::TaskRecord;
use crate::routes::errors::reject;
use crate::routes::tasks::with_balancer;

pub fn events_route(
  balancer: Balancer,
  poll_interval: Duration,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("api" / "task" / String / "events")
    .and(warp::get())
    .and(with_balancer(balancer))
    .and(warp::any().map(move || poll_interval))
    .and_then(handle_events)
}

struct PollState {
  balancer: Balancer,
  task_id: String,
  interval: Interval,
  last: Option<TaskRecord>,
  done: bool,
}

fn changed(last: Option<&TaskRecord>, current: &TaskRecord) -> bool {
  match last {
    Some(last) => {
      last.status != current.status || last.message != current.message || last.images != current.images
    }
    None => true,
  }
}

async fn handle_events(
  task_id: String,
  balancer: Balancer,
  poll_interval: Duration,
) -> Result<impl warp::Reply, warp::Rejection> {
  validate_task_id(&task_id).map_err(reject)?;
  // Fail fast with 404 before opening a stream for an unknown task.
  balancer.tasks().load(&task_id).await.map_err(reject)?;

  let mut interval = tokio::time::interval(poll_interval);
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let state = PollState {
    balancer,
    task_id,
    interval,
    last: None,
    done: false,
  };

  let events = stream::unfold(state, |mut state| async move {
    loop {
      if state.done {
        return None;
      }
      state.interval.tick().await;
      let polled = state.balancer.task_status(&state.task_id).await;
      match polled {
        Ok((record, response)) => {
          let emit = changed(state.last.as_ref(), &record);
          state.done = record.status.is_terminal();
          state.last = Some(record);
          if emit {
            return Some((Event::default().event("status").json_data(&response), state));
          }
        }
        Err(BalancerError::TaskNotFound(id)) => {
          state.done = true;
          let event = Event::default()
            .event("gone")
            .json_data(json!({ "task_id": id, "detail": "Task not found" }));
          return Some((event, state));
        }
        Err(e) => {
          error!("Polling task {} failed: {}", state.task_id, e);
          state.done = true;
          let event = Event::default()
            .event("error")
            .json_data(json!({ "task_id": state.task_id, "detail": e.to_string() }));
          return Some((event, state));
        }
      }
    }
  });

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(events)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::TaskStatus;

  fn record(status: TaskStatus) -> TaskRecord {
    TaskRecord {
      task_id: "t".into(),
      client_id: "c".into(),
      node: "n:1".into(),
      status,
      message: String::new(),
      images: vec![],
      timestamp: 0.0,
    }
  }

  #[test]
  fn test_changed_only_on_new_state() {
    let pending = record(TaskStatus::Pending);
    assert!(changed(None, &pending));
    assert!(!changed(Some(&pending), &pending.clone()));
    assert!(changed(Some(&pending), &record(TaskStatus::Success)));
  }
}
