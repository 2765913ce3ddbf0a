mod notification;

use std::cell::RefCell;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

use main_trampoline::{MainContext, Trampoline, TrampolineConfig, TrampolineError, WaitOptions};

/// Loop wake-up interval (one frame)
const FRAME: Duration = Duration::from_millis(16);

thread_local! {
    /// Main-thread-only UI state: messages shown so far
    static SHOWN: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = TrampolineConfig::from_env()?;
    info!(?config, "Configuration loaded");

    run(config)
}

#[cfg(not(windows))]
fn run(config: TrampolineConfig) -> anyhow::Result<()> {
    use main_trampoline::PumpLoop;

    let pump = PumpLoop::new();
    let ctx = MainContext::with_config(pump.handle(), config);
    let workers = spawn_workers(&ctx.trampoline())?;

    pump.run_until(|| workers.iter().all(|w| w.is_finished()), FRAME);
    finish(&ctx, workers)
}

#[cfg(windows)]
fn run(config: TrampolineConfig) -> anyhow::Result<()> {
    use main_trampoline::Win32Loop;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, MSG, MWMO_INPUTAVAILABLE, MsgWaitForMultipleObjectsEx, PM_REMOVE,
        PeekMessageW, QS_ALLINPUT, TranslateMessage, WM_QUIT,
    };

    let adapter = Win32Loop::for_current_thread()?;
    let ctx = MainContext::with_config(adapter.clone(), config);
    let workers = spawn_workers(&ctx.trampoline())?;

    let mut msg = MSG::default();
    'outer: while !workers.iter().all(|w| w.is_finished()) {
        // Wait for message OR one frame
        unsafe {
            MsgWaitForMultipleObjectsEx(
                None,
                FRAME.as_millis() as u32,
                QS_ALLINPUT,
                MWMO_INPUTAVAILABLE,
            );
        }

        // WM_TRAMPOLINE reaches the adapter's window through DispatchMessageW
        while unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE) }.as_bool() {
            if msg.message == WM_QUIT {
                break 'outer;
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }

    let result = finish(&ctx, workers);
    adapter.close();
    result
}

/// Record a message in main-thread state and show it as a toast
fn show_on_main(text: String) -> usize {
    notification::show(&text);
    SHOWN.with_borrow_mut(|shown| {
        shown.push(text);
        shown.len()
    })
}

fn spawn_workers(tramp: &Trampoline) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut workers = Vec::new();

    // Plain calls from several workers
    for i in 0..3 {
        let tramp = tramp.clone();
        let worker = thread::Builder::new()
            .name(format!("worker-{i}"))
            .spawn(move || {
                match tramp.call(move || show_on_main(format!("Hello from worker {i}"))) {
                    Ok(count) => info!(worker = i, count, "Shown on main thread"),
                    Err(e) => warn!(worker = i, "Call failed: {e}"),
                }
            })?;
        workers.push(worker);
    }

    // A call that outlives its timeout: caller gives up, main thread finishes it
    let slow = tramp.clone();
    workers.push(
        thread::Builder::new()
            .name("slow".to_string())
            .spawn(move || {
                let result = slow.call_timeout(
                    || {
                        thread::sleep(Duration::from_millis(500));
                        show_on_main("Slow call finished".to_string())
                    },
                    Some(Duration::from_millis(100)),
                );
                match result {
                    Err(TrampolineError::Timeout { timeout }) => {
                        info!(?timeout, "Slow call timed out as expected")
                    }
                    other => warn!(?other, "Slow call did not time out"),
                }
            })?,
    );

    // Script: poll main-thread state until every worker message is shown
    workers.push(tramp.spawn_script("wait-shown", |s| {
        let options = WaitOptions {
            timeout: Duration::from_secs(5),
            repeat_delay: Duration::from_millis(50),
            strict: true,
        };
        let check = || SHOWN.with_borrow(|shown| (shown.len() >= 3).then_some(shown.len()));
        match s.wait_for("worker messages", check, options) {
            Ok(count) => {
                info!(?count, "Worker messages visible");
                s.sleep(Duration::from_millis(100));
                if let Err(e) = s.main(|| show_on_main("Script done".to_string())) {
                    warn!("Script final step failed: {e}");
                }
            }
            Err(e) => warn!("Script wait failed: {e}"),
        }
    })?);

    Ok(workers)
}

fn finish(ctx: &MainContext, workers: Vec<JoinHandle<()>>) -> anyhow::Result<()> {
    // Drain stragglers queued after the last loop iteration
    ctx.drain();
    for worker in workers {
        if worker.join().is_err() {
            warn!("Worker panicked");
        }
    }
    ctx.shutdown();

    SHOWN.with_borrow(|shown| {
        for line in shown {
            info!(line = %line, "Shown");
        }
    });
    Ok(())
}
