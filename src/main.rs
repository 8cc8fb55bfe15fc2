use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};
use std::{env, io, process, thread};

use rustyzrtp::config::Config;
use rustyzrtp::identity::{DirFileAccess, ZidStore};
use rustyzrtp::log::{LogSink, TracingLogSink, logger::Logger};
use rustyzrtp::protocol::{Direction, MessageCode, MessageSeverity};
use rustyzrtp::rtp::RawPacket;
use rustyzrtp::security_events::SecurityEventListener;
use rustyzrtp::transform::{PacketTransformer, UdpZrtpTransport, ZrtpContext, ZrtpTransformEngine};
use rustyzrtp::zrtp_core::ZrtpConfig;

const NEGOTIATION_DEADLINE: Duration = Duration::from_secs(5);
const MEDIA_PACKETS: u16 = 5;

/// Prints security events of one endpoint to stdout.
struct ConsoleListener {
    name: &'static str,
}

impl SecurityEventListener for ConsoleListener {
    fn cipher_negotiated(&self, cipher: &str) {
        println!("[{}] cipher: {}", self.name, cipher);
    }

    fn sas_computed(&self, sas: &str, verified: bool) {
        println!("[{}] SAS: {} (verified: {})", self.name, sas, verified);
    }

    fn security_established(&self, direction: Direction, cipher: &str) {
        println!("[{}] {:?} secured with {}", self.name, direction, cipher);
    }

    fn security_disabled(&self, direction: Direction) {
        println!("[{}] {:?} back to clear", self.name, direction);
    }

    fn message(&self, severity: MessageSeverity, code: MessageCode) {
        println!("[{}] {:?}: {}", self.name, severity, code);
    }

    fn negotiation_failed(&self, code: MessageCode) {
        println!("[{}] negotiation failed: {}", self.name, code);
    }

    fn peer_does_not_support_protocol(&self) {
        println!("[{}] peer does not speak ZRTP", self.name);
    }
}

struct Endpoint {
    name: &'static str,
    ssrc: u32,
    sock: Arc<UdpSocket>,
    engine: Arc<ZrtpTransformEngine>,
    received: Arc<AtomicUsize>,
}

fn main() -> io::Result<()> {
    // --- Parse CLI args ----------------------------------------------------
    //
    //   rustyzrtp                 -> standard settings, log file under ./logs
    //   rustyzrtp zrtp.ini        -> [Logging] and [Zrtp] from the file
    let args: Vec<String> = env::args().collect();
    let config = match args.len() {
        1 => Config::empty(),
        2 => Config::load(&args[1]).map_err(io::Error::other)?,
        _ => {
            eprintln!("Usage: {} [CONFIG.ini]", args[0]);
            process::exit(1);
        }
    };

    // --- Logging -----------------------------------------------------------
    let (_logger, log_sink): (Option<Logger>, Arc<dyn LogSink>) =
        if config.get("Logging", "sink") == Some("tracing") {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
            let sink: Arc<dyn LogSink> = Arc::new(TracingLogSink);
            (None, sink)
        } else {
            let logger = Logger::start(&config);
            eprintln!("[rustyzrtp] logging to {}", logger.file_path().display());
            let sink: Arc<dyn LogSink> = Arc::new(logger.handle());
            (Some(logger), sink)
        };

    let zrtp_config = ZrtpConfig::from_config(&config).map_err(io::Error::other)?;

    // --- Two endpoints on localhost ----------------------------------------
    let sock_a = Arc::new(UdpSocket::bind("127.0.0.1:0")?);
    let sock_b = Arc::new(UdpSocket::bind("127.0.0.1:0")?);
    let addr_a = sock_a.local_addr()?;
    let addr_b = sock_b.local_addr()?;

    let alice = endpoint("alice", 0xA11C_E000, sock_a, addr_b, &config, &log_sink);
    let bob = endpoint("bob", 0x0000_B0B0, sock_b, addr_a, &config, &log_sink);

    for ep in [&alice, &bob] {
        if !ep
            .engine
            .initialize(&format!("{}.zid", ep.name), false, Some(zrtp_config.clone()))
        {
            return Err(io::Error::other(format!("{}: ZRTP initialization failed", ep.name)));
        }
        ep.engine.set_own_ssrc(ep.ssrc);
    }

    let running = Arc::new(AtomicBool::new(true));
    let readers = [
        spawn_reader(&alice, Arc::clone(&running))?,
        spawn_reader(&bob, Arc::clone(&running))?,
    ];

    alice.engine.start_zrtp();
    bob.engine.start_zrtp();

    // --- Wait for both sides to go secure ----------------------------------
    let deadline = Instant::now() + NEGOTIATION_DEADLINE;
    let secured = loop {
        if both_secure(&alice, &bob) {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        thread::sleep(Duration::from_millis(20));
    };

    if secured {
        let sas_a = alice.engine.sas().unwrap_or_default();
        let sas_b = bob.engine.sas().unwrap_or_default();
        println!("alice SAS: {sas_a}");
        println!("bob   SAS: {sas_b}");
        println!("SAS match: {}", sas_a == sas_b);

        // --- Exchange a few SRTP packets -----------------------------------
        for seq in 0..MEDIA_PACKETS {
            send_media(&alice, addr_b, seq, b"hello from alice")?;
            send_media(&bob, addr_a, seq, b"hello from bob")?;
        }
        thread::sleep(Duration::from_millis(200));
        println!(
            "media received: alice={} bob={} (sent {} each way)",
            alice.received.load(Ordering::SeqCst),
            bob.received.load(Ordering::SeqCst),
            MEDIA_PACKETS
        );
    } else {
        eprintln!("[rustyzrtp] negotiation did not complete within {NEGOTIATION_DEADLINE:?}");
    }

    // --- Shutdown ----------------------------------------------------------
    alice.engine.close();
    bob.engine.close();
    running.store(false, Ordering::SeqCst);
    for reader in readers {
        let _ = reader.join();
    }

    if secured {
        Ok(())
    } else {
        Err(io::Error::new(io::ErrorKind::TimedOut, "ZRTP negotiation timed out"))
    }
}

fn endpoint(
    name: &'static str,
    ssrc: u32,
    sock: Arc<UdpSocket>,
    peer: SocketAddr,
    config: &Config,
    log_sink: &Arc<dyn LogSink>,
) -> Endpoint {
    // Each endpoint needs its own ZID, so each gets its own context.
    let context = match config.get_non_empty("Zrtp", "zid_dir") {
        Some(dir) => ZrtpContext::new(Arc::clone(log_sink))
            .with_file_access(Arc::new(DirFileAccess::new(rustyzrtp::config::expand_path(dir)))),
        None => ZrtpContext::with_identity_store(Arc::clone(log_sink), Arc::new(ZidStore::in_memory())),
    };
    let engine = Arc::new(ZrtpTransformEngine::new(context));
    engine.set_connector(Arc::new(UdpZrtpTransport::new(
        Arc::clone(&sock),
        peer,
        Arc::clone(log_sink),
    )));
    engine.set_user_callback(Arc::new(ConsoleListener { name }));
    Endpoint {
        name,
        ssrc,
        sock,
        engine,
        received: Arc::new(AtomicUsize::new(0)),
    }
}

fn spawn_reader(ep: &Endpoint, running: Arc<AtomicBool>) -> io::Result<thread::JoinHandle<()>> {
    let sock = Arc::clone(&ep.sock);
    let engine = Arc::clone(&ep.engine);
    let received = Arc::clone(&ep.received);
    let name = ep.name;
    sock.set_read_timeout(Some(Duration::from_millis(50)))?;
    thread::Builder::new()
        .name(format!("{name}-rx"))
        .spawn(move || {
            let mut buf = [0u8; 2048];
            while running.load(Ordering::SeqCst) {
                let n = match sock.recv_from(&mut buf) {
                    Ok((n, _)) => n,
                    Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                        continue;
                    }
                    Err(e) => {
                        eprintln!("[{name}] recv error: {e}");
                        break;
                    }
                };
                let packet = RawPacket::from_vec(buf[..n].to_vec());
                if let Some(media) = engine.reverse_transform(packet) {
                    received.fetch_add(1, Ordering::SeqCst);
                    if let Ok(payload) = media.payload() {
                        println!("[{name}] media: {}", String::from_utf8_lossy(payload));
                    }
                }
            }
        })
}

fn both_secure(a: &Endpoint, b: &Endpoint) -> bool {
    [a, b].iter().all(|ep| {
        ep.engine.secure_communication_status() && ep.engine.sas().is_some()
    })
}

fn send_media(ep: &Endpoint, peer: SocketAddr, seq: u16, payload: &[u8]) -> io::Result<()> {
    let mut bytes = vec![0x80, 0x00];
    bytes.extend_from_slice(&seq.to_be_bytes());
    bytes.extend_from_slice(&(u32::from(seq) * 160).to_be_bytes());
    bytes.extend_from_slice(&ep.ssrc.to_be_bytes());
    bytes.extend_from_slice(payload);
    if let Some(out) = ep.engine.transform(RawPacket::from_vec(bytes)) {
        ep.sock.send_to(out.as_slice(), peer)?;
    }
    Ok(())
}
