//! Stand-in for a platform tray / user-facing notification surface.
//! This trait lets the core notify whatever surface is wired up without
//! depending on a particular one (no native system tray binding exists
//! yet).

pub trait Ui: Send + Sync {
    fn notify(&self, text: &str);
}

/// Default [`Ui`] implementation: logs via `tracing` and echoes to
/// stderr, the way `trust_ca()` reports progress directly to the user.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleUi;

impl Ui for ConsoleUi {
    fn notify(&self, text: &str) {
        tracing::info!(%text, "notify");
        eprintln!("{text}");
    }
}
