//! Port interfaces for sync side effects

use homeboard_domain::ChangeNotice;

/// Receives a notice after every committed store mutation
///
/// Delivery is best-effort and must not block the writer.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, notice: ChangeNotice);
}

/// Notifier that drops every notice
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _notice: ChangeNotice) {}
}
