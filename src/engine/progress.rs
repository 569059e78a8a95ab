//! Progress counter for finished files

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

// Progress bar type alias
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Force a refresh of the bar (e.g. so counter shows "0 files" immediately).
pub fn refresh_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.refresh();
    }
}

/// Create a counter for unknown total (shows count without percentage)
pub fn create_counter(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " files"
    )))
}

/// Update progress bar if available
/// Uses try_lock so a contended bar never blocks the caller; it catches up on the next update.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
    }
}

/// Observer callback that counts one file per closed output.
pub fn counter_observer(bar: &ProgressBar) -> Box<dyn FnMut(&crate::Notice) + Send> {
    let bar = Arc::clone(bar);
    Box::new(move |notice| {
        if matches!(notice, crate::Notice::WriteEnd { .. }) {
            update_progress_bar(&bar, 1);
        }
    })
}
