//! Minimal embedder: wires up the object/timer pool and the UDP talker pool, hosts one object
//! in each, and runs until killed. Stands in for whatever a real deployment's startup sequence
//! builds on top of `nucleus-core`/`nucleus-ipc`.

use nucleus_core::config::Config;
use nucleus_core::identity::Handle;
use nucleus_core::logging;
use nucleus_core::manager::Manager;
use nucleus_core::object::{EventMask, ExecResult, Object, ObjectCore};
use nucleus_core::selector::{ObjectDriver, Pool, SelectorDriver};
use nucleus_core::serialize::{CommandMarker, Engine, FrameResult, ReadCursor, TypeMap, WireObject, WireType, WriteCursor};
use nucleus_core::service::Service;
use nucleus_ipc::{IpcConfig, Talker, TalkerDriver, TalkerSink};
use parking_lot::Mutex;
use slog::{info, o};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A heartbeat tick, sent as a wire message rather than just logged locally - the concrete
/// message type the IPC talker pool actually carries.
#[derive(WireType)]
struct HeartbeatPing {
    tick: u64,
}

const OBJECT_SERVICE: u32 = 0;
const TALKER_SERVICE: u32 = 1;
const OBJECT_POOL: u32 = 0;
const TALKER_POOL: u32 = 1;

/// Ticks once a second, logs, and serializes a `HeartbeatPing` through the same `Engine`/
/// `TypeMap` pipeline the IPC talker pool uses for its wire messages. Stands in for whatever
/// application objects an embedder hosts in the object/timer pool.
struct Heartbeat {
    core: ObjectCore,
    logger: slog::Logger,
    ticks: Mutex<u64>,
    types: TypeMap,
    engine: Mutex<Engine>,
}

impl Heartbeat {
    fn new(core: ObjectCore, logger: slog::Logger, max_nesting: usize) -> Heartbeat {
        let mut types = TypeMap::new();
        types.register::<HeartbeatPing>();
        Heartbeat {
            core,
            logger,
            ticks: Mutex::new(0),
            types,
            engine: Mutex::new(Engine::new(max_nesting)),
        }
    }

    /// Encodes `ping` through `Engine::drive_serialize`, driving it across as many scratch
    /// buffers as it takes (a `HeartbeatPing` fits in one, but the loop is what a multi-buffer
    /// message actually needs).
    fn encode(&self, ping: HeartbeatPing) -> Vec<u8> {
        let mut engine = self.engine.lock();
        engine.queue_object(Arc::new(ping)).expect("single object fits within max_nesting");

        let mut encoded = Vec::new();
        loop {
            let mut scratch = [0u8; 256];
            let mut cursor = WriteCursor::new(&mut scratch);
            let result = engine.drive_serialize(&mut cursor, &self.types).expect("HeartbeatPing always resolves its own type");
            encoded.extend_from_slice(&scratch[..cursor.position()]);
            if result == FrameResult::Done {
                break;
            }
        }
        encoded
    }
}

impl Object for Heartbeat {
    fn handle(&self) -> Handle {
        self.core.handle()
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn execute(&self, _events: EventMask, deadline: &mut Instant) -> ExecResult {
        let mut ticks = self.ticks.lock();
        *ticks += 1;
        let encoded = self.encode(HeartbeatPing { tick: *ticks });
        info!(self.logger, "heartbeat"; "tick" => *ticks, "wire_bytes" => encoded.len());
        *deadline = Instant::now() + Duration::from_secs(1);
        ExecResult::Nok
    }
}

/// Logs whatever the talker pool reassembles, decoding recognized wire types through the same
/// `Engine`/`TypeMap` pipeline `Heartbeat` encodes them with. Only attempted for a segment's
/// first chunk (`NewCommand`) - mid-stream continuations are handed to the command executer in
/// a real embedder, not decoded piecemeal by a logging stand-in.
struct LoggingSink {
    logger: slog::Logger,
    types: TypeMap,
    max_nesting: usize,
}

impl LoggingSink {
    fn new(logger: slog::Logger, max_nesting: usize) -> LoggingSink {
        let mut types = TypeMap::new();
        types.register::<HeartbeatPing>();
        LoggingSink { logger, types, max_nesting }
    }
}

impl TalkerSink for LoggingSink {
    fn deliver(&self, peer: SocketAddr, message_id: u64, marker: CommandMarker, body: Vec<u8>) {
        if marker != CommandMarker::NewCommand {
            info!(self.logger, "ipc segment delivered";
                "peer" => %peer, "message_id" => message_id, "marker" => ?marker, "bytes" => body.len());
            return;
        }

        let mut engine = Engine::new(self.max_nesting);
        engine.begin_receive().expect("fresh engine has room for one top-level command");
        let mut decoded = Vec::new();
        let mut cursor = ReadCursor::new(&body);

        match engine.drive_deserialize(&mut cursor, &self.types, &mut decoded) {
            Ok(FrameResult::Done) if decoded.len() == 1 => {
                if let Some(ping) = decoded[0].as_any().downcast_ref::<HeartbeatPing>() {
                    info!(self.logger, "heartbeat ping received"; "peer" => %peer, "tick" => ping.tick);
                    return;
                }
            }
            _ => {}
        }

        info!(self.logger, "ipc segment delivered";
            "peer" => %peer, "message_id" => message_id, "marker" => ?marker, "bytes" => body.len());
    }
}

/// Builds an object via `Service::insert`, then hosts the same `Arc` in `pool` and records the
/// resulting residency - the glue `Service`/`Pool` leave to whoever bootstraps them.
fn host<S, F>(service: &Service, pool: &Pool<S>, make: F) -> Handle
where
    S: SelectorDriver,
    F: FnOnce(Handle) -> Arc<dyn Object>,
{
    let built: Arc<Mutex<Option<Arc<dyn Object>>>> = Arc::new(Mutex::new(None));
    let slot = built.clone();

    let handle = service
        .insert(move |h| {
            let obj = make(h);
            *slot.lock() = Some(obj.clone());
            obj
        })
        .expect("service accepts inserts while running");

    let object = built.lock().take().expect("make() ran synchronously during insert");
    pool.push(object.clone(), move |residency| object.core().set_residency(residency))
        .expect("pool has capacity for a startup object");

    handle
}

fn main() -> std::io::Result<()> {
    let config = Config::default();
    let logger = logging::init(&config.logging);

    let manager = Manager::new();
    Manager::prepare_thread(&manager);

    let object_service = Arc::new(Service::new(OBJECT_SERVICE, config.service.clone()));
    manager.add_service(object_service.clone());

    let object_pool = Arc::new(Pool::new(OBJECT_POOL, config.object_pool.clone(), ObjectDriver::new));
    manager.add_pool(OBJECT_POOL, object_pool.clone());

    let heartbeat_logger = logger.new(o!("component" => "heartbeat"));
    let max_nesting = config.serializer.max_nesting;
    host(&object_service, &object_pool, move |h| {
        Arc::new(Heartbeat::new(ObjectCore::new(h), heartbeat_logger, max_nesting)) as Arc<dyn Object>
    });

    let talker_service = Arc::new(Service::new(TALKER_SERVICE, config.service.clone()));
    manager.add_service(talker_service.clone());

    let talker_pool = Arc::new(Pool::new(TALKER_POOL, config.talker_pool.clone(), TalkerDriver::new));
    manager.add_pool(TALKER_POOL, talker_pool.clone());

    let socket = mio::net::UdpSocket::bind("0.0.0.0:0".parse().unwrap())?;
    let base_port = socket.local_addr()?.port() as u32;
    let sink = Arc::new(LoggingSink::new(logger.new(o!("component" => "talker")), config.serializer.max_nesting));
    let ipc_config = IpcConfig::default();

    host(&talker_service, &talker_pool, move |h| {
        Arc::new(Talker::new(ObjectCore::new(h), socket, base_port, ipc_config, sink)) as Arc<dyn Object>
    });

    info!(logger, "nucleus-server started"; "ipc_base_port" => base_port);

    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
