use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::thread;
use std::time::Instant;

#[derive(Debug)]
pub enum TimerCommand {
    Schedule { id: usize, when: Instant },
    Cancel(usize),
}

/// Spawn the timer thread and return (cmd_sender, expired_receiver).
///
/// The thread owns a min-heap of deadlines and reports each expired id on the
/// returned receiver. It exits once either side of the channel pair is dropped.
pub fn spawn_timer_thread() -> std::io::Result<(Sender<TimerCommand>, Receiver<usize>)> {
    let (cmd_tx, cmd_rx) = unbounded::<TimerCommand>();
    let (expired_tx, expired_rx) = unbounded::<usize>();

    thread::Builder::new()
        .name("asyncgen-timer".to_string())
        .spawn(move || run_timer_loop(cmd_rx, expired_tx))?;

    Ok((cmd_tx, expired_rx))
}

fn run_timer_loop(cmd_rx: Receiver<TimerCommand>, expired_tx: Sender<usize>) {
    let mut heap: BinaryHeap<Reverse<(Instant, usize)>> = BinaryHeap::new();
    let mut canceled: HashSet<usize> = HashSet::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse((when, id))) = heap.peek().copied() {
            if when > now {
                break;
            }
            heap.pop();
            if canceled.remove(&id) {
                continue;
            }
            if let Err(e) = expired_tx.send(id) {
                log::trace!("timer thread: loop side gone ({e:?}), exiting");
                return;
            }
        }

        let command = match heap.peek() {
            Some(Reverse((when, _))) => match cmd_rx.recv_timeout(when.saturating_duration_since(now)) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            // nothing scheduled: block until a command arrives
            None => match cmd_rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            TimerCommand::Schedule { id, when } => heap.push(Reverse((when, id))),
            TimerCommand::Cancel(id) => {
                canceled.insert(id);
            }
        }
    }
    log::trace!("timer thread: command channel closed, exiting");
}
