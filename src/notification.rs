//! Desktop notification support (demo main-thread work)

use notify_rust::Notification;

const APP_NAME: &str = "Main Trampoline";

/// Show toast notification; false if the platform refused it
pub fn show(body: &str) -> bool {
    match Notification::new()
        .appname(APP_NAME)
        .summary(APP_NAME)
        .body(body)
        .show()
    {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Notification failed: {e}");
            false
        }
    }
}
