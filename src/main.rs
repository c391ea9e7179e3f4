use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callcore::call::{CallController, CallHandle, CallService, CallStatus, CallType, Counterpart};
use callcore::config::{self, CallConfig, ConfigStore};
use callcore::events::{self, CallEvent, EventBus};
use callcore::media::VirtualCamera;
use callcore::peer::RtcPeerFactory;
use callcore::signaling::{SignalingHub, SignalingTransport, WsSignalingClient};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum CallKind {
    Audio,
    #[default]
    Video,
}

impl From<CallKind> for CallType {
    fn from(kind: CallKind) -> Self {
        match kind {
            CallKind::Audio => CallType::Audio,
            CallKind::Video => CallType::Video,
        }
    }
}

/// callcore command line arguments
#[derive(Parser, Debug)]
#[command(name = "callcore")]
#[command(version, about = "One-to-one call session core", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML); created with defaults if missing
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Place a call between two in-process users over real WebRTC
    Demo {
        /// Media kind of the call
        #[arg(short = 't', long, value_enum, default_value = "video")]
        call_type: CallKind,

        /// Seconds to stay connected before hanging up
        #[arg(short = 's', long, default_value_t = 3)]
        seconds: u64,
    },
    /// Call a user through the configured WebSocket signaling server
    Dial {
        /// Counterpart user id
        callee: String,

        #[arg(short = 't', long, value_enum, default_value = "video")]
        call_type: CallKind,

        /// Conversation the call belongs to
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting callcore v{}", env!("CARGO_PKG_VERSION"));

    let store = match &args.config {
        Some(path) => ConfigStore::load(path).await?,
        None => ConfigStore::in_memory(CallConfig::default()),
    };

    match args.command {
        Command::Demo { call_type, seconds } => run_demo(store, call_type.into(), seconds).await,
        Command::Dial {
            callee,
            call_type,
            conversation,
        } => run_dial(store, &callee, call_type.into(), conversation).await,
        Command::Config => {
            print!("{}", config::to_toml(&store.get())?);
            Ok(())
        }
    }
}

fn spawn_service(
    store: ConfigStore,
    signaling: Arc<dyn SignalingTransport>,
    camera: VirtualCamera,
) -> CallHandle {
    let media = store.get().media.clone();
    let (controller, inbox) = CallController::new(
        store,
        signaling,
        Arc::new(camera),
        Arc::new(RtcPeerFactory::new(media)),
        Arc::new(EventBus::new()),
    );
    CallService::spawn(controller, inbox)
}

async fn run_demo(store: ConfigStore, call_type: CallType, seconds: u64) -> anyhow::Result<()> {
    let hub = SignalingHub::new();
    let alice = spawn_service(
        store.clone(),
        Arc::new(hub.connect(Counterpart::new("alice", "Alice"))),
        VirtualCamera::new("alice"),
    );
    let bob = spawn_service(
        store.clone(),
        Arc::new(hub.connect(Counterpart::new("bob", "Bob"))),
        VirtualCamera::new("bob"),
    );

    // Bob picks up every incoming call
    let answerer = bob.clone();
    let mut bob_events = bob.events();
    tokio::spawn(async move {
        while let Some(event) = events::recv_matching(&mut bob_events, "call.incoming").await {
            if let CallEvent::Incoming { call_id, caller, .. } = event {
                tracing::info!("Bob answering call {} from {}", call_id, caller.id);
                if let Err(e) = answerer.answer_call().await {
                    tracing::warn!("Bob failed to answer: {}", e);
                }
            }
        }
    });

    alice.start_call("bob", call_type, None).await?;

    let setup = Duration::from_secs(store.get().call.setup_timeout_secs.max(1) + 1);
    let state = tokio::time::timeout(
        setup,
        alice.wait_for(|s| s.status() == CallStatus::Active || s.last_ended.is_some()),
    )
    .await??;

    if state.status() == CallStatus::Active {
        println!(
            "Call {} connected ({})",
            state.call_id().map(|id| id.to_string()).unwrap_or_default(),
            call_type
        );
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        alice.end_call().await?;
    }

    let ended = alice
        .wait_for(|s| s.last_ended.is_some() && s.active_call.is_none())
        .await?;
    if let Some(last) = &ended.last_ended {
        println!(
            "Call ended: status={:?} reason={:?} duration={}",
            last.status,
            last.reason,
            callcore::call::format_duration(last.duration_secs)
        );
    }

    alice.shutdown();
    bob.shutdown();
    Ok(())
}

async fn run_dial(
    store: ConfigStore,
    callee: &str,
    call_type: CallType,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let client = WsSignalingClient::connect(&store.get().signaling).await?;
    let handle = spawn_service(store, Arc::new(client), VirtualCamera::new("callcore"));

    handle.start_call(callee, call_type, conversation).await?;
    println!("Calling {} ... (Ctrl-C to hang up)", callee);

    let mut state = handle.state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, hanging up");
                let _ = handle.end_call().await;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                if let Some(error) = &snapshot.error {
                    println!("Error: {}", error);
                }
                if snapshot.active_call.is_none() && snapshot.incoming_call.is_none() {
                    if let Some(last) = &snapshot.last_ended {
                        println!("Call ended: {:?}", last.reason);
                    }
                    break;
                }
            }
        }
    }

    handle.shutdown();
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "callcore=error,webrtc=error",
        LogLevel::Warn => "callcore=warn,webrtc=warn",
        LogLevel::Info => "callcore=info,webrtc=warn",
        LogLevel::Verbose => "callcore=debug,webrtc=warn",
        LogLevel::Debug => "callcore=debug,webrtc=info",
        LogLevel::Trace => "callcore=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
