use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gcodekit4::config::{Config, ConnectionType};
use gcodekit4::{
    init_logging, list_ports, Autolevel, Communicator, ConnectionDriver, ConnectionParams,
    ControllerSession, FileSource, GcodeSource, GcodeVM, MoveSplitter, ProcessorChainBuilder,
    RecoveryTracker, RuntimeOverride, SerialCommunicator, TcpCommunicator, ToolChange,
    ToolChangeMacros, VERSION,
};
use gcodekit4_parser::NullToolChangeController;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "gcodekit4", version = VERSION, about = "CNC streaming core: G-code VM, processor pipeline, controller session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a G-code file through the processor chain to a connected controller.
    Run {
        /// Path to a G-code file.
        file: PathBuf,
        /// Process the chain and print the resulting lines without connecting to hardware.
        #[arg(long)]
        dry_run: bool,
        /// Surface map JSON file to drive the autoleveler.
        #[arg(long)]
        surface_map: Option<PathBuf>,
        /// Recovery snapshot file path; defaults to the configured recovery directory.
        #[arg(long)]
        recovery_file: Option<PathBuf>,
        /// Maximum outstanding (unacknowledged) lines before blocking.
        #[arg(long, default_value_t = 8)]
        max_buffered: usize,
    },
    /// List available serial ports.
    Ports,
    /// Show or initialize the persisted configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the active configuration (defaults merged with the config file, if any).
    Show,
    /// Write the default configuration to the config file.
    Init,
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Run { file, dry_run, surface_map, recovery_file, max_buffered } => {
            run(file, dry_run, surface_map, recovery_file, max_buffered)
        }
        Command::Ports => {
            for port in list_ports()? {
                println!("{}\t{}", port.port_name, port.description);
            }
            Ok(())
        }
        Command::Config { action } => config_command(action),
    }
}

fn config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let path = Config::config_file_path()?;
            let config = if path.exists() {
                Config::load_from_file(&path)?
            } else {
                Config::new()
            };
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Init => {
            Config::ensure_config_dir()?;
            let path = Config::config_file_path()?;
            Config::new().save_to_file(&path)?;
            println!("wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

const AXES: [char; 3] = ['x', 'y', 'z'];

fn run(
    file: PathBuf,
    dry_run: bool,
    surface_map: Option<PathBuf>,
    recovery_file: Option<PathBuf>,
    max_buffered: usize,
) -> Result<()> {
    let config = Config::config_file_path()
        .ok()
        .filter(|p| p.exists())
        .map(Config::load_from_file)
        .transpose()?
        .unwrap_or_default();

    let source = FileSource::new(&file);
    let mut builder = ProcessorChainBuilder::new().add(Box::new(MoveSplitter::new(
        config.file_processing.move_splitter_max_length,
    )));

    if let Some(map_path) = surface_map {
        builder = builder.add(Box::new(Autolevel::load(&map_path).context("loading surface map")?));
    }

    let recovery_path = recovery_file.unwrap_or_else(|| {
        config.file_processing.recovery_directory.join("recovery.json")
    });
    builder = builder.add(Box::new(RecoveryTracker::new(
        recovery_path.clone(),
        config.file_processing.recovery_save_interval as u64,
        serde_json::json!({ "file": file.display().to_string() }),
    )));

    builder = builder.add(Box::new(ToolChange::new(
        Box::new(NullToolChangeController),
        ToolChangeMacros::default(),
        HashMap::new(),
    )));

    if !dry_run {
        builder = builder.add(Box::new(RuntimeOverride::new(max_buffered)));
    }

    let mut chain = builder.build(&source).context("building processor chain")?;
    let mut vm = GcodeVM::new(AXES.to_vec());

    if dry_run {
        for line in source.lines()? {
            let line = line?;
            for out in chain.process_line(line)? {
                vm.run(&out);
                println!("{out}");
            }
        }
        for out in chain.flush()? {
            vm.run(&out);
            println!("{out}");
        }
        info!(pos = ?vm.state.pos, total_time = vm.state.total_time, "dry run complete");
        return Ok(());
    }

    let comm = open_communicator(&config)?;
    let session = Arc::new(ControllerSession::new(AXES.to_vec(), 4, 250));

    for frame in session.init_sequence() {
        comm.lock().send(frame.as_bytes())?;
        comm.lock().send(b"\n")?;
    }

    let reader_comm = comm.clone();
    let reader_session = session.clone();
    std::thread::spawn(move || read_loop(reader_comm, reader_session));

    for line in source.lines()? {
        let line = line?;
        for out in chain.process_line(line)? {
            let (rx, work) = session.send_wait(&out.to_string());
            for frame in work.frames {
                comm.lock().send(frame.as_bytes())?;
                comm.lock().send(b"\n")?;
            }
            match rx.recv() {
                Ok(Ok(_body)) => debug!(line = %out, "acknowledged"),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(gcodekit4::Error::comm("session closed").into()),
            }
        }
    }
    for out in chain.flush()? {
        let (rx, work) = session.send_wait(&out.to_string());
        for frame in work.frames {
            comm.lock().send(frame.as_bytes())?;
            comm.lock().send(b"\n")?;
        }
        rx.recv().map_err(|_| gcodekit4::Error::comm("session closed"))??;
    }

    info!("job complete");
    Ok(())
}

fn open_communicator(config: &Config) -> Result<Arc<Mutex<Box<dyn Communicator>>>> {
    let mut params = ConnectionParams {
        timeout_ms: config.connection.timeout_ms,
        baud_rate: config.connection.baud_rate,
        port: config.connection.port.clone(),
        network_port: config.connection.tcp_port,
        ..Default::default()
    };

    let communicator: Box<dyn Communicator> = match config.connection.connection_type {
        ConnectionType::Serial => {
            params.driver = ConnectionDriver::Serial;
            let mut c = SerialCommunicator::new();
            c.connect(&params)?;
            Box::new(c)
        }
        ConnectionType::Tcp => {
            params.driver = ConnectionDriver::Tcp;
            let mut c = TcpCommunicator::new();
            c.connect(&params)?;
            Box::new(c)
        }
    };

    Ok(Arc::new(Mutex::new(communicator)))
}

fn read_loop(comm: Arc<Mutex<Box<dyn Communicator>>>, session: Arc<ControllerSession>) {
    let mut buf = Vec::new();
    loop {
        let chunk = match comm.lock().receive() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "controller read failed, stopping reader");
                return;
            }
        };
        if chunk.is_empty() {
            std::thread::sleep(std::time::Duration::from_millis(10));
            continue;
        }
        buf.extend_from_slice(&chunk);
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Err(e) = session.on_frame(trimmed) {
                warn!(error = %e, raw = %trimmed, "malformed controller frame dropped");
            }
        }
    }
}
