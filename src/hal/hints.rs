use std::time::Duration;

/// Outbound capability to the performance hint manager. A hint started with
/// `do_hint` is cancelled by the manager after `timeout` unless reissued;
/// `end_hint` cancels it eagerly. Neither call is assumed idempotent, so the
/// controller performs its own change detection before emitting.
pub trait HintManager: Send + Sync {
    fn do_hint(&self, hint_name: &str, timeout: Duration);
    fn end_hint(&self, hint_name: &str);
}
