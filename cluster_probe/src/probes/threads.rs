use crate::core::{panic_message, ProbeError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Where a probe is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProbePhase {
  Idle,
  Running,
  Stopping,
  Done,
}

/// Shared between a probe and its threads. Threads poll
/// [`is_finished`](ProbeControl::is_finished) between iterations.
pub struct ProbeControl {
  name: String,
  finished: AtomicBool,
  phase: Mutex<ProbePhase>,
}
impl ProbeControl {
  pub fn new<S: Into<String>>(name: S) -> ProbeControl {
    ProbeControl {
      name: name.into(),
      finished: AtomicBool::new(false),
      phase: Mutex::new(ProbePhase::Idle),
    }
  }

  pub fn is_finished(&self) -> bool {
    self.finished.load(Ordering::Acquire)
  }

  pub fn phase(&self) -> ProbePhase {
    *self.phase.lock()
  }

  fn advance(&self, next: ProbePhase) {
    let mut phase = self.phase.lock();
    debug_assert!(*phase < next, "{:?} -> {:?}", *phase, next);
    debug!("{}: {:?} -> {:?}", self.name, *phase, next);
    if next >= ProbePhase::Stopping {
      self.finished.store(true, Ordering::Release);
    }
    *phase = next;
  }
}

/// The loop one probe thread runs until the control says stop.
pub type ProbeBody<'env, T> =
  Box<dyn FnOnce(&ProbeControl) -> Result<T, ProbeError> + Send + 'env>;

/// Starts every body on its own named thread, lets them run for `duration`,
/// tells them to stop and joins all of them.
///
/// A thread that fails or panics does not stop its siblings; its failure is
/// returned once every thread has been joined. With several failures the
/// first one in thread order wins, the others are logged.
pub fn run_for<'env, T: Send>(
  control: &ProbeControl,
  duration: Duration,
  bodies: Vec<(String, ProbeBody<'env, T>)>,
) -> Result<Vec<T>, ProbeError> {
  let joined = crossbeam::scope(|s| {
    let mut spawn_failed = false;
    let handles = bodies
      .into_iter()
      .map(|(name, body)| {
        let handle = s
          .builder()
          .name(name.clone())
          .spawn(move |_| body(control));
        spawn_failed |= handle.is_err();
        (name, handle)
      })
      .collect::<Vec<_>>();
    control.advance(ProbePhase::Running);
    if !spawn_failed {
      thread::sleep(duration);
    }
    control.advance(ProbePhase::Stopping);
    handles
      .into_iter()
      .map(|(name, handle)| match handle {
        Ok(h) => h.join().unwrap_or_else(|p| {
          Err(ProbeError::ThreadPanicked {
            thread: name,
            message: panic_message(&*p),
          })
        }),
        Err(e) => Err(ProbeError::Failed(format!(
          "cannot start thread {}: {}",
          name, e
        ))),
      })
      .collect::<Vec<_>>()
  });
  control.advance(ProbePhase::Done);
  let results = joined.map_err(|p| ProbeError::ThreadPanicked {
    thread: control.name.clone(),
    message: panic_message(&*p),
  })?;

  let mut values = Vec::with_capacity(results.len());
  let mut first_error = None;
  for res in results {
    match res {
      Ok(v) => values.push(v),
      Err(e) if first_error.is_none() => first_error = Some(e),
      Err(e) => error!("{}: {}", control.name, e),
    }
  }
  match first_error {
    Some(e) => Err(e),
    None => Ok(values),
  }
}

#[test]
fn test_failed_thread_does_not_abandon_siblings() {
  use std::sync::atomic::AtomicU64;

  let iterations = AtomicU64::new(0);
  let control = ProbeControl::new("test");
  let failing: ProbeBody<'_, u64> =
    Box::new(|_| Err(ProbeError::Failed("bad".to_string())));
  let panicking: ProbeBody<'_, u64> = Box::new(|_| panic!("worse"));
  let mut bodies = vec![
    ("failing".to_string(), failing),
    ("panicking".to_string(), panicking),
  ];
  for i in 0..3 {
    let iterations = &iterations;
    let looping: ProbeBody<'_, u64> = Box::new(move |ctl| {
      while !ctl.is_finished() {
        iterations.fetch_add(1, Ordering::Relaxed);
        thread::sleep(Duration::from_millis(1));
      }
      Ok(i)
    });
    bodies.push((format!("looping-{}", i), looping));
  }
  let res = run_for(&control, Duration::from_millis(50), bodies);
  assert!(matches!(res, Err(ProbeError::Failed(ref m)) if m == "bad"));
  assert!(iterations.load(Ordering::Relaxed) > 3);
  assert_eq!(control.phase(), ProbePhase::Done);
}

#[test]
fn test_results_in_thread_order() {
  let control = ProbeControl::new("test");
  let bodies = (0..4u32)
    .map(|i| {
      let body: ProbeBody<'_, u32> = Box::new(move |_| Ok(i * 10));
      (format!("t-{}", i), body)
    })
    .collect();
  let res = run_for(&control, Duration::from_millis(1), bodies).unwrap();
  assert_eq!(res, vec![0, 10, 20, 30]);
}
