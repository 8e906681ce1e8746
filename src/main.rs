//! Supervisor entry point (§6): loads the three config files, opens the
//! axis transport (real serial or simulated), builds the [`Dispatcher`] and
//! drives it off a command/status FIFO pair at a fixed poll rate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use telescoped_core::activity::AxisActivity;
use telescoped_core::axis::{Axis, AxisId};
use telescoped_core::config::{self, CoreConfig, KeyValueFile};
use telescoped_core::consts::DEFAULT_POLL_HZ;
use telescoped_core::dispatcher::Dispatcher;
use telescoped_core::errors::SupervisorError;
use telescoped_core::fifo::MessageFifo;
use telescoped_core::mount::MeshTable;
use telescoped_core::target::{ApparentPosition, Ephemeris, Target};
use telescoped_core::transport::{AxisAddress, AxisChannels, AxisSetup, AxisTransport, SerialTransport, VirtualTransport};

/// Passes `Fixed`/`Apparent` coordinates straight through with no
/// precession or aberration applied, and leaves `Object` targets
/// unresolved. The real catalog/ephemeris daemon (`obj_cir` and friends) is
/// a separate process this core only has a named boundary with (§1);
/// wiring the supervisor up to it is outside this crate's scope.
struct PassthroughEphemeris;

impl Ephemeris for PassthroughEphemeris {
    fn apparent_position(&self, target: &Target, _mjd: f64) -> ApparentPosition {
        match target {
            Target::Fixed { ra_hours, dec_deg, .. } | Target::Apparent { ra_hours, dec_deg, .. } => {
                ApparentPosition {
                    ra_hours: *ra_hours,
                    dec_deg: *dec_deg,
                }
            }
            Target::Object { handle, .. } => {
                tracing::warn!(object = %handle.0, "no ephemeris daemon wired up, leaving object target unresolved");
                ApparentPosition { ra_hours: 0.0, dec_deg: 0.0 }
            }
            Target::Horizon { .. } => ApparentPosition { ra_hours: 0.0, dec_deg: 0.0 },
        }
    }
}

/// Picks between the real serial transport and the in-process simulator
/// behind one object so the dispatcher never has to know which it's
/// driving (§4.1: "the two code paths must produce identical observable
/// state").
enum AnyTransport {
    Real(SerialTransport),
    Virtual(VirtualTransport),
}

impl AnyTransport {
    /// Advances the simulated clock. A no-op against real hardware, which
    /// runs on its own clock.
    fn tick(&mut self, dt_secs: f64) {
        if let AnyTransport::Virtual(vt) = self {
            vt.tick(dt_secs);
        }
    }
}

impl AxisTransport for AnyTransport {
    fn open(&mut self, addr: &AxisAddress) -> Result<AxisChannels, telescoped_core::errors::TransportError> {
        match self {
            AnyTransport::Real(t) => t.open(addr),
            AnyTransport::Virtual(t) => t.open(addr),
        }
    }

    fn close(&mut self, handle: telescoped_core::transport::Handle) {
        match self {
            AnyTransport::Real(t) => t.close(handle),
            AnyTransport::Virtual(t) => t.close(handle),
        }
    }

    fn write(&mut self, handle: telescoped_core::transport::Handle, text: &str) -> Result<(), telescoped_core::errors::TransportError> {
        match self {
            AnyTransport::Real(t) => t.write(handle, text),
            AnyTransport::Virtual(t) => t.write(handle, text),
        }
    }

    fn setup(&mut self, handle: telescoped_core::transport::Handle, setup: &AxisSetup) -> Result<(), telescoped_core::errors::TransportError> {
        match self {
            AnyTransport::Real(t) => t.setup(handle, setup),
            AnyTransport::Virtual(t) => t.setup(handle, setup),
        }
    }

    fn read_int(&mut self, handle: telescoped_core::transport::Handle, query: &str) -> Result<i64, telescoped_core::errors::TransportError> {
        match self {
            AnyTransport::Real(t) => t.read_int(handle, query),
            AnyTransport::Virtual(t) => t.read_int(handle, query),
        }
    }

    fn read_nonblocking(&mut self, handle: telescoped_core::transport::Handle) -> Vec<String> {
        match self {
            AnyTransport::Real(t) => t.read_nonblocking(handle),
            AnyTransport::Virtual(t) => t.read_nonblocking(handle),
        }
    }

    fn interrupt(&mut self, handle: telescoped_core::transport::Handle) -> Result<(), telescoped_core::errors::TransportError> {
        match self {
            AnyTransport::Real(t) => t.interrupt(handle),
            AnyTransport::Virtual(t) => t.interrupt(handle),
        }
    }
}

struct Args {
    config_dir: PathBuf,
    in_fifo: PathBuf,
    out_fifo: PathBuf,
    virtual_mode: bool,
}

fn parse_args() -> Args {
    let mut positional = Vec::new();
    let mut virtual_mode = false;
    for arg in std::env::args().skip(1) {
        if arg == "--virtual" {
            virtual_mode = true;
        } else {
            positional.push(arg);
        }
    }
    let mut it = positional.into_iter();
    Args {
        config_dir: it
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/usr/local/telescope/archive/config")),
        in_fifo: it.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp/telescoped.in")),
        out_fifo: it.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp/telescoped.out")),
        virtual_mode,
    }
}

fn init_tracing() {
    let file_appender = tracing_appender::rolling::daily("/var/log/telescoped", "telescoped.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the guard must outlive the process for buffered
    // lines to flush, and the supervisor never exits cleanly.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
}

/// Reads command lines off `in_path` on a dedicated thread so the poll loop
/// never blocks waiting for a writer to open the fifo (§6: the dispatcher
/// polls at a fixed rate regardless of command traffic). Reopens the fifo
/// on EOF, matching a fifo's reopen-per-writer semantics.
fn spawn_command_reader(in_path: PathBuf) -> std::sync::mpsc::Receiver<String> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || loop {
        let Ok(file) = std::fs::File::open(&in_path) else {
            std::thread::sleep(Duration::from_millis(200));
            continue;
        };
        let mut reader = std::io::BufReader::new(file);
        loop {
            let mut line = String::new();
            match std::io::BufRead::read_line(&mut reader, &mut line) {
                Ok(0) => break, // writer closed its end; reopen
                Ok(_) => {
                    if tx.send(line.trim_end_matches('\n').to_string()).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

struct LoadedAxis {
    id: AxisId,
    activity: AxisActivity,
}

fn open_axis(
    transport: &mut AnyTransport,
    file: &KeyValueFile,
    prefix: &str,
    id: AxisId,
    host: &str,
    port: u16,
) -> Result<Option<LoadedAxis>, SupervisorError> {
    let cfg = CoreConfig::axis_group(file, prefix, id)?;
    if !cfg.have {
        return Ok(None);
    }
    cfg.validate()?;

    let address: u8 = file.required_f64(&format!("{prefix}ADDR"))? as u8;
    let addr = AxisAddress {
        host: host.to_string(),
        port,
        address,
    };
    let channels = transport.open(&addr)?;
    transport.setup(
        channels.command,
        &AxisSetup {
            msteps: cfg.step,
            esteps: cfg.estep,
            esign: cfg.esign,
            maxvel: cfg.max_vel,
            maxacc: cfg.max_acc,
            limacc: cfg.slim_acc,
            ipolar: cfg.enc_home,
        },
    )?;

    Ok(Some(LoadedAxis {
        id,
        activity: AxisActivity::new(Axis::new(cfg), channels),
    }))
}

fn run() -> Result<(), SupervisorError> {
    let args = parse_args();
    tracing::info!(config_dir = %args.config_dir.display(), virtual_mode = args.virtual_mode, "starting telescoped-core");

    let sched_cfg = config::SchedConfig::load(args.config_dir.join("telsched.cfg"))?;
    let telescoped_cfg_path = args.config_dir.join("telescoped.cfg");
    let core_cfg = CoreConfig::load(&telescoped_cfg_path)?;
    let kv = KeyValueFile::load(&telescoped_cfg_path)?;
    let mount = config::load_mount_axes(args.config_dir.join("hc.cfg"), core_cfg.latitude_deg)?;
    let mesh_path = args.config_dir.join("mesh.dat");
    let mesh = if mesh_path.exists() {
        MeshTable::load(&mesh_path)?
    } else {
        MeshTable::identity()
    };

    let mut transport = if args.virtual_mode {
        AnyTransport::Virtual(VirtualTransport::new())
    } else {
        AnyTransport::Real(SerialTransport::new(9600, Duration::from_millis(500)))
    };

    let host = kv.required_string("HOST")?;
    let port = kv.required_f64("PORT")? as u16;

    let mut axes = HashMap::new();
    for (prefix, id) in [("H", AxisId::Ha), ("D", AxisId::Dec), ("R", AxisId::Rotator)] {
        if let Some(loaded) = open_axis(&mut transport, &kv, prefix, id, &host, port)? {
            axes.insert(loaded.id, loaded.activity);
        }
    }

    let mut dispatcher = Dispatcher::new(
        mount,
        mesh,
        core_cfg,
        axes,
        Box::new(PassthroughEphemeris),
        1013.25, // placeholder site pressure/temperature until a weather feed is wired up
        10.0,
        sched_cfg.stow_alt_deg,
        sched_cfg.stow_az_deg,
    );

    let mut fifo = MessageFifo::open(&args.in_fifo, &args.out_fifo)?;
    let commands = spawn_command_reader(args.in_fifo.clone());
    let poll_period = Duration::from_secs_f64(1.0 / DEFAULT_POLL_HZ);
    let mut host_mjd = 60000.0;

    loop {
        if let Ok(line) = commands.try_recv() {
            tracing::info!(%line, "command received");
            let status = dispatcher.handle_command(&mut transport, &line);
            if let Err(err) = fifo.write_status(&status) {
                tracing::error!(%err, "failed to write status line");
            }
        }

        transport.tick(poll_period.as_secs_f64());

        for status in dispatcher.poll(&mut transport, poll_period.as_secs_f64(), host_mjd) {
            if let Err(err) = fifo.write_status(&status) {
                tracing::error!(%err, "failed to write status line");
            }
        }

        host_mjd += poll_period.as_secs_f64() / 86400.0;
        spin_sleep::sleep(poll_period);
    }
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        tracing::error!(%err, "telescoped-core exited with error");
        std::process::exit(1);
    }
}
