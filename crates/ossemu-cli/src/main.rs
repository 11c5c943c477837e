use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ossemu_dsp::format::{
    AFMT_A_LAW, AFMT_MU_LAW, AFMT_S16_BE, AFMT_S16_LE, AFMT_S8, AFMT_U16_BE, AFMT_U16_LE, AFMT_U8,
    SUPPORTED_FORMATS,
};
use ossemu_dsp::ioctl::SOUND_VERSION;
use ossemu_dsp::{
    AccessMode, BufferInfo, CountInfo, DspParams, DspReply, DspRequest, LegacyGeometry, Session,
    SessionConfig, PCM_ENABLE_INPUT, PCM_ENABLE_OUTPUT,
};
use pcm_engine::sim::{Fault, SimConfig, SimControl, SimOpener};
use pcm_engine::{Direction, Frames, HwConfig, PcmState, SFrames};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let sim: SimConfig = load_json(cli.sim.as_deref())?;
    let config: SessionConfig = load_json(cli.config.as_deref())?;
    let opener = SimOpener::new(sim);

    match cli.command {
        Commands::Probe(args) => print_report(&probe(&opener, config, &args)?),
        Commands::Play(args) => print_report(&play(&opener, config, &args)?),
        Commands::Mmap(args) => print_report(&mmap(&opener, config, &args)?),
    }
}

#[derive(Parser)]
#[command(
    name = "ossemu",
    author,
    version,
    about = "Drive the legacy DSP emulation against the software engine"
)]
struct Cli {
    /// Session configuration (JSON). Missing fields keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Software engine configuration (JSON): capabilities, devices, boundary.
    #[arg(long, global = true)]
    sim: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a device, apply the requested parameters and report the
    /// negotiated geometry.
    Probe(OpenArgs),
    /// Stream silence through read/write transfers while the simulated clock
    /// runs.
    Play(PlayArgs),
    /// Map the device buffer, trigger it and follow the mapped position.
    Mmap(MmapArgs),
}

#[derive(Args)]
struct OpenArgs {
    /// Legacy device path.
    #[arg(long, default_value = "/dev/dsp")]
    device: String,
    #[arg(long, value_enum, default_value_t = Mode::Write)]
    mode: Mode,
    #[arg(long)]
    rate: Option<i32>,
    #[arg(long)]
    channels: Option<i32>,
    #[arg(long, value_enum)]
    format: Option<Format>,
    /// Fragment request, `0xMMMMSSSS` (max fragments, log2 of the size).
    #[arg(long, value_parser = parse_fragment)]
    fragment: Option<i32>,
}

#[derive(Args)]
struct PlayArgs {
    #[command(flatten)]
    open: OpenArgs,
    /// Number of chunks to transfer.
    #[arg(long, default_value_t = 16)]
    chunks: usize,
    /// Chunk size in bytes; defaults to the legacy block size.
    #[arg(long)]
    chunk_bytes: Option<usize>,
    /// Frames the simulated clock moves after each chunk; defaults to half
    /// a chunk.
    #[arg(long)]
    advance: Option<Frames>,
    /// Inject an xrun before the chunk with this index.
    #[arg(long)]
    xrun_at: Option<usize>,
}

#[derive(Args)]
struct MmapArgs {
    #[command(flatten)]
    open: OpenArgs,
    /// Number of clock steps to follow.
    #[arg(long, default_value_t = 8)]
    steps: usize,
    /// Frames per clock step; defaults to one legacy period.
    #[arg(long)]
    advance: Option<Frames>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Read,
    Write,
    Duplex,
}

impl Mode {
    fn flags(self) -> i32 {
        match self {
            Mode::Read => libc::O_RDONLY,
            Mode::Write => libc::O_WRONLY,
            Mode::Duplex => libc::O_RDWR,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    MuLaw,
    ALaw,
    U8,
    S8,
    S16Le,
    S16Be,
    U16Le,
    U16Be,
}

impl Format {
    fn afmt(self) -> i32 {
        match self {
            Format::MuLaw => AFMT_MU_LAW,
            Format::ALaw => AFMT_A_LAW,
            Format::U8 => AFMT_U8,
            Format::S8 => AFMT_S8,
            Format::S16Le => AFMT_S16_LE,
            Format::S16Be => AFMT_S16_BE,
            Format::U16Le => AFMT_U16_LE,
            Format::U16Be => AFMT_U16_BE,
        }
    }
}

fn parse_fragment(value: &str) -> Result<i32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed
        .map(|raw| raw as i32)
        .map_err(|err| format!("invalid fragment request {value:?}: {err}"))
}

fn load_json<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(report).context("failed to encode report")?;
    println!("{text}");
    Ok(())
}

#[derive(Serialize)]
struct StreamReport {
    direction: Direction,
    engine: Option<HwConfig>,
    legacy: LegacyGeometry,
    mmap_advance: Frames,
    stopped: bool,
    mapped: bool,
}

#[derive(Serialize)]
struct SessionReport {
    device: String,
    mode: AccessMode,
    params: DspParams,
    caps: i32,
    block_size: i32,
    streams: Vec<StreamReport>,
}

impl SessionReport {
    fn capture(session: &Session) -> Result<Self> {
        let streams = Direction::ALL
            .into_iter()
            .filter_map(|direction| session.stream(direction))
            .map(|stream| StreamReport {
                direction: stream.direction(),
                engine: stream.hw_config(),
                legacy: *stream.legacy(),
                mmap_advance: stream.mmap_advance(),
                stopped: stream.is_stopped(),
                mapped: stream.is_mapped(),
            })
            .collect();
        Ok(Self {
            device: session.node().path(),
            mode: session.mode(),
            params: *session.params(),
            caps: session.caps(),
            block_size: session.block_size()?,
            streams,
        })
    }
}

fn open_session(opener: &SimOpener, config: SessionConfig, args: &OpenArgs) -> Result<Session> {
    let mut session = Session::open_path(opener, &args.device, args.mode.flags(), config)
        .with_context(|| format!("failed to open {}", args.device))?;
    // Same order legacy players use: format, channels, rate, fragments.
    let requests = [
        args.format.map(|format| DspRequest::SetFormat(format.afmt())),
        args.channels.map(DspRequest::Channels),
        args.rate.map(DspRequest::Speed),
        args.fragment.map(DspRequest::SetFragment),
    ];
    for request in requests.into_iter().flatten() {
        let reply = session
            .control(request)
            .with_context(|| format!("{request:?} rejected"))?;
        debug!(?request, ?reply, "applied");
    }
    Ok(session)
}

fn control_for(opener: &SimOpener, direction: Direction) -> Result<SimControl> {
    opener
        .control(direction)
        .ok_or_else(|| anyhow!("no {direction:?} stream was opened"))
}

fn pointer(session: &mut Session, direction: Direction) -> Result<CountInfo> {
    match session.control(DspRequest::GetPointer(direction))? {
        DspReply::Pointer(info) => Ok(info),
        other => bail!("unexpected pointer reply {other:?}"),
    }
}

fn space(session: &mut Session, direction: Direction) -> Result<BufferInfo> {
    match session.control(DspRequest::GetSpace(direction))? {
        DspReply::Space(info) => Ok(info),
        other => bail!("unexpected space reply {other:?}"),
    }
}

#[derive(Serialize)]
struct ProbeReport {
    version: i32,
    formats: i32,
    session: SessionReport,
}

fn probe(opener: &SimOpener, config: SessionConfig, args: &OpenArgs) -> Result<ProbeReport> {
    let mut session = open_session(opener, config, args)?;
    let report = ProbeReport {
        version: SOUND_VERSION,
        formats: SUPPORTED_FORMATS,
        session: SessionReport::capture(&session)?,
    };
    session.close().context("close failed")?;
    Ok(report)
}

#[derive(Serialize)]
struct PlayStep {
    chunk: usize,
    transferred: usize,
    xrun: bool,
    state: PcmState,
    delay: i32,
    pointer: CountInfo,
    space: BufferInfo,
}

#[derive(Serialize)]
struct TransferReport {
    session: SessionReport,
    steps: Vec<PlayStep>,
}

fn play(opener: &SimOpener, config: SessionConfig, args: &PlayArgs) -> Result<TransferReport> {
    let mut session = open_session(opener, config, &args.open)?;
    let direction = match args.open.mode {
        Mode::Read => Direction::Capture,
        Mode::Write | Mode::Duplex => Direction::Playback,
    };
    let control = control_for(opener, direction)?;
    let frame_bytes = session
        .stream(direction)
        .map(|stream| stream.frame_bytes())
        .unwrap_or(1);
    let chunk_bytes = match args.chunk_bytes {
        Some(bytes) => bytes,
        None => usize::try_from(session.block_size()?).context("negative block size")?,
    };
    let advance = args
        .advance
        .unwrap_or((chunk_bytes / frame_bytes / 2) as Frames);
    let mut buf = vec![0u8; chunk_bytes];
    session.params().format.fill_silence(&mut buf);

    let mut steps = Vec::with_capacity(args.chunks);
    for chunk in 0..args.chunks {
        let xrun = args.xrun_at == Some(chunk);
        if xrun {
            control.inject(Fault::Xrun);
        }
        let transferred = match direction {
            Direction::Playback => session.write(&buf),
            Direction::Capture => session.read(&mut buf),
        }
        .with_context(|| format!("transfer of chunk {chunk} failed"))?;
        control.advance(advance);
        let delay = match direction {
            Direction::Playback => session.output_delay()?,
            Direction::Capture => to_bytes(control.delay(), frame_bytes),
        };
        steps.push(PlayStep {
            chunk,
            transferred,
            xrun,
            state: control.state(),
            delay,
            pointer: pointer(&mut session, direction)?,
            space: space(&mut session, direction)?,
        });
    }
    let report = TransferReport {
        session: SessionReport::capture(&session)?,
        steps,
    };
    session.close().context("close failed")?;
    info!(chunks = args.chunks, "transfer finished");
    Ok(report)
}

fn to_bytes(frames: SFrames, frame_bytes: usize) -> i32 {
    i32::try_from(frames.max(0) as u64 * frame_bytes as u64).unwrap_or(i32::MAX)
}

#[derive(Serialize)]
struct MmapStep {
    step: usize,
    hw_frames: Frames,
    engine_delay: SFrames,
    pointer: CountInfo,
}

#[derive(Serialize)]
struct MmapReport {
    session: SessionReport,
    mapping_bytes: usize,
    steps: Vec<MmapStep>,
}

fn mmap(opener: &SimOpener, config: SessionConfig, args: &MmapArgs) -> Result<MmapReport> {
    let mut session = open_session(opener, config, &args.open)?;
    let (direction, prot, trigger) = match args.open.mode {
        Mode::Read => (Direction::Capture, libc::PROT_READ, PCM_ENABLE_INPUT),
        Mode::Write | Mode::Duplex => (Direction::Playback, libc::PROT_WRITE, PCM_ENABLE_OUTPUT),
    };
    let control = control_for(opener, direction)?;
    let (mapping_bytes, period) = {
        let stream = session
            .stream(direction)
            .ok_or_else(|| anyhow!("no {direction:?} stream"))?;
        let legacy = stream.legacy();
        (
            (legacy.buffer_size as usize) * stream.frame_bytes(),
            legacy.period_size,
        )
    };

    session.control(DspRequest::SetTrigger(0))?;
    let id = session
        .mmap(mapping_bytes, prot)
        .context("mapping the device buffer failed")?;
    session.control(DspRequest::SetTrigger(trigger))?;

    let advance = args.advance.unwrap_or(period);
    let mut steps = Vec::with_capacity(args.steps);
    for step in 0..args.steps {
        control.advance(advance);
        let pointer = pointer(&mut session, direction)?;
        steps.push(MmapStep {
            step,
            hw_frames: control.hw_pos(),
            engine_delay: control.delay(),
            pointer,
        });
    }
    let report = MmapReport {
        session: SessionReport::capture(&session)?,
        mapping_bytes,
        steps,
    };
    session.munmap(id).context("unmap failed")?;
    session.close().context("close failed")?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_argument_accepts_hex_and_decimal() {
        assert_eq!(parse_fragment("0x0004000c").unwrap(), 0x0004_000c);
        assert_eq!(parse_fragment("12").unwrap(), 12);
        assert_eq!(parse_fragment("0x7fff000a").unwrap(), 0x7fff_000a);
        assert!(parse_fragment("fragments").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn probe_reports_negotiated_geometry() {
        let opener = SimOpener::default();
        let args = OpenArgs {
            device: "/dev/dspW".to_string(),
            mode: Mode::Write,
            rate: Some(48_000),
            channels: Some(2),
            format: None,
            fragment: None,
        };
        let report = probe(&opener, SessionConfig::default(), &args).unwrap();
        assert_eq!(report.session.params.rate, 48_000);
        assert_eq!(report.session.params.legacy_format, AFMT_S16_LE);
        assert_eq!(report.session.streams.len(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["session"]["mode"], "write_only");
    }

    #[test]
    fn play_survives_an_injected_xrun() {
        let opener = SimOpener::default();
        let args = PlayArgs {
            open: OpenArgs {
                device: "/dev/dsp".to_string(),
                mode: Mode::Write,
                rate: None,
                channels: None,
                format: None,
                fragment: None,
            },
            chunks: 6,
            chunk_bytes: Some(1024),
            advance: None,
            xrun_at: Some(3),
        };
        let report = play(&opener, SessionConfig::default(), &args).unwrap();
        assert_eq!(report.steps.len(), 6);
        assert!(report.steps.iter().all(|step| step.transferred == 1024));
        assert!(report.steps[3].xrun);
    }
}
