//! Process-level fault detection.
//!
//! A panic inside request handling is answered with a 500 by the router and
//! is not a fault. Any other panic (a bridge session, a background task) is
//! reported so `main` can run the shutdown sequence with exit code 1.

use std::future::Future;
use tokio::sync::mpsc;

tokio::task_local! {
    static CONTAINED: ();
}

/// Run `future` as request handling: panics inside it are not faults.
pub async fn contain_panics<F: Future>(future: F) -> F::Output {
    CONTAINED.scope((), future).await
}

/// Install a panic hook that reports uncontained panics.
///
/// The previous hook still runs first, so the default panic message is kept.
pub fn watch_panics() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        if CONTAINED.try_with(|_| ()).is_ok() {
            return;
        }
        let _ = tx.send(info.to_string());
    }));
    rx
}
