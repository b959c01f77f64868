use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use chrono::Local;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use gateway_common::{
    ClientCommand, CommandError, Dispatcher, MeshTransport, Moment, PersistenceGateway, Reply,
};

#[derive(Debug)]
pub struct PendingCommand {
    pub command: ClientCommand,
    pub reply: oneshot::Sender<Result<Reply, CommandError>>,
}

pub fn spawn_owner<T, S>(
    mut dispatcher: Dispatcher<T, S>,
    mut commands: mpsc::Receiver<PendingCommand>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    T: MeshTransport + Send + 'static,
    S: PersistenceGateway + Send + 'static,
{
    std::thread::Builder::new()
        .name("mesh-owner".to_string())
        .spawn(move || {
            let interval = Duration::from_millis(dispatcher.config().timing.loop_interval_ms);
            info!("owner loop started");
            while !shutdown.load(Ordering::Relaxed) {
                run_cycle(&mut dispatcher, &mut commands, current_moment);
                std::thread::sleep(interval);
            }
            commands.close();
            info!("owner loop stopped");
        })
}

/// One loop iteration: mesh frames first, then queued commands in arrival
/// order, then the timers.
pub fn run_cycle<T, S>(
    dispatcher: &mut Dispatcher<T, S>,
    commands: &mut mpsc::Receiver<PendingCommand>,
    clock: impl Fn() -> Moment,
) where
    T: MeshTransport,
    S: PersistenceGateway,
{
    dispatcher.drain_inbound(clock());

    // Commands that arrive while this batch runs wait for the next cycle.
    let batch = commands.len();
    for _ in 0..batch {
        let Ok(pending) = commands.try_recv() else {
            break;
        };
        let result = dispatcher.handle_client_command(pending.command, clock());
        if pending.reply.send(result).is_err() {
            debug!("client left before its reply was ready");
        }
    }

    dispatcher.tick(clock());
}

pub fn current_moment() -> Moment {
    Moment::new(monotonic_ms(), Local::now().naive_local())
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use gateway_common::{
        config::RetryPolicy, GatewayConfig, InboundFrame, LoopbackTransport, MemoryStore, NodeId,
        SettingKey, TransportError,
    };

    use super::*;

    // Every frame sent queues another client command, and the first one
    // also lands a relay report in the inbound queue.
    struct BusyTransport {
        queue: mpsc::Sender<PendingCommand>,
        inbound: VecDeque<InboundFrame>,
        sent: usize,
    }

    impl MeshTransport for BusyTransport {
        fn send(&mut self, _node: NodeId, _payload: &str) -> Result<(), TransportError> {
            if self.sent == 0 {
                self.inbound.push_back(InboundFrame {
                    node: NodeId(1),
                    payload: "a1".to_string(),
                });
            }
            self.sent += 1;
            let (reply, _) = oneshot::channel();
            let _ = self.queue.try_send(PendingCommand {
                command: ClientCommand::TurnOffAc,
                reply,
            });
            Ok(())
        }

        fn receive(&mut self) -> Option<InboundFrame> {
            self.inbound.pop_front()
        }
    }

    fn dispatcher() -> Dispatcher<LoopbackTransport, MemoryStore> {
        let mut config = GatewayConfig::default();
        config.retry = RetryPolicy::immediate(1);
        let store = MemoryStore::new().with_setting(SettingKey::AcAllowed, "True");
        Dispatcher::bootstrap(config, LoopbackTransport::new(), store, current_moment())
    }

    fn enqueue(
        queue: &mpsc::Sender<PendingCommand>,
        command: ClientCommand,
    ) -> oneshot::Receiver<Result<Reply, CommandError>> {
        let (reply, response) = oneshot::channel();
        queue.try_send(PendingCommand { command, reply }).unwrap();
        response
    }

    #[test]
    fn mesh_frames_are_applied_before_queued_commands() {
        let mut dispatcher = dispatcher();
        let (queue, mut commands) = mpsc::channel(8);

        let mut status = enqueue(&queue, ClientCommand::AcStatus);
        dispatcher.transport_mut().push_inbound(NodeId(1), "a1");
        run_cycle(&mut dispatcher, &mut commands, current_moment);

        assert_eq!(status.try_recv().unwrap(), Ok(Reply::text("AC is ON")));
    }

    #[test]
    fn commands_in_one_cycle_apply_in_enqueue_order() {
        let mut dispatcher = dispatcher();
        let (queue, mut commands) = mpsc::channel(8);

        let mut on = enqueue(&queue, ClientCommand::TurnOnAc);
        let mut off = enqueue(&queue, ClientCommand::TurnOffAc);
        run_cycle(&mut dispatcher, &mut commands, current_moment);

        assert_eq!(on.try_recv().unwrap(), Ok(Reply::text("AC is ON")));
        assert_eq!(off.try_recv().unwrap(), Ok(Reply::text("AC is OFF")));
        assert!(!dispatcher.climate().ac_state());
        let states: Vec<bool> = dispatcher.store().events.iter().map(|e| e.state).collect();
        assert_eq!(states, vec![true, false]);
    }

    #[test]
    fn commands_queued_mid_cycle_wait_behind_the_mesh() {
        let (queue, mut commands) = mpsc::channel(64);
        let transport = BusyTransport {
            queue: queue.clone(),
            inbound: VecDeque::new(),
            sent: 0,
        };
        let mut config = GatewayConfig::default();
        config.retry = RetryPolicy::immediate(1);
        let store = MemoryStore::new().with_setting(SettingKey::AcAllowed, "True");
        let mut dispatcher = Dispatcher::bootstrap(config, transport, store, current_moment());

        let mut on = enqueue(&queue, ClientCommand::TurnOnAc);
        run_cycle(&mut dispatcher, &mut commands, current_moment);

        assert_eq!(on.try_recv().unwrap(), Ok(Reply::text("AC is ON")));
        assert_eq!(dispatcher.transport().sent, 2);
        assert_eq!(dispatcher.transport().inbound.len(), 1);
        assert_eq!(commands.len(), 2);

        run_cycle(&mut dispatcher, &mut commands, current_moment);

        assert!(dispatcher.transport().inbound.is_empty());
        assert!(!dispatcher.climate().ac_state());
        assert_eq!(dispatcher.transport().sent, 6);
        assert_eq!(commands.len(), 4);
    }

    #[test]
    fn reply_to_a_vanished_client_is_dropped() {
        let mut dispatcher = dispatcher();
        let (queue, mut commands) = mpsc::channel(8);

        drop(enqueue(&queue, ClientCommand::TurnOnAc));
        run_cycle(&mut dispatcher, &mut commands, current_moment);

        assert!(dispatcher.climate().ac_state());
    }

    #[test]
    fn owner_thread_stops_on_shutdown() {
        let (queue, commands) = mpsc::channel(8);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_owner(dispatcher(), commands, shutdown.clone()).unwrap();

        let response = enqueue(&queue, ClientCommand::AcPermStatus);
        assert_eq!(response.blocking_recv().unwrap(), Ok(Reply::text("True")));

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert!(queue.is_closed());
    }
}
