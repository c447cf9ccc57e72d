//! The `seesay run` command: an interactive console over one session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use seesay_assets::config::SeesayConfig;
use seesay_assets::{AssetClient, JsonFileSink, JsonFileStore, SilentCaptureDevice};
use seesay_core::answer::{ClickOutcome, ClickPoint};
use seesay_core::catalog::Catalog;
use seesay_core::persistence::Persistence;
use seesay_core::preload::ImagePreloadQueue;
use seesay_core::recording::RecordingStatus;
use seesay_core::report::GradeOutcome;
use seesay_core::session::{DevJump, Phase};
use seesay_core::traits::CaptureDevice;
use seesay_core::{SessionDeps, SessionEngine};

const TICK: Duration = Duration::from_millis(100);

pub struct RunOptions {
    pub catalog: Option<String>,
    pub assets: Option<String>,
    pub store: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub no_mic: bool,
    pub config: Option<PathBuf>,
}

/// One operator input line.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Age {
        years: String,
        months: String,
        id: String,
    },
    Allow,
    Skip,
    Click {
        image: u32,
        point: Option<ClickPoint>,
    },
    Hint,
    Pause,
    Stop,
    Redo,
    Grade(GradeOutcome),
    Dev,
    Jump(DevJump),
    Status,
    Reset,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb.to_lowercase().as_str(), args.as_slice()) {
        ("age", [years, months, id]) => Command::Age {
            years: years.to_string(),
            months: months.to_string(),
            id: id.to_string(),
        },
        ("age", _) => return Err("usage: age <years> <months> <id>".into()),
        ("allow", []) => Command::Allow,
        ("skip", []) => Command::Skip,
        ("click", [image, rest @ ..]) => {
            let image = image
                .parse()
                .map_err(|_| format!("not an image number: {image}"))?;
            let point = match rest {
                [] => None,
                [x, y, w, h] => {
                    let coords = [x, y, w, h]
                        .iter()
                        .map(|v| v.parse::<f64>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| "click coordinates must be numbers".to_string())?;
                    Some(ClickPoint {
                        x: coords[0],
                        y: coords[1],
                        display_width: coords[2],
                        display_height: coords[3],
                    })
                }
                _ => return Err("usage: click <n> [x y width height]".into()),
            };
            Command::Click { image, point }
        }
        ("hint", []) => Command::Hint,
        ("pause", []) => Command::Pause,
        ("stop", []) => Command::Stop,
        ("redo", []) => Command::Redo,
        ("grade", [outcome]) => Command::Grade(outcome.parse()?),
        ("grade", _) => return Err("usage: grade success|partial|failure".into()),
        ("dev", []) => Command::Dev,
        ("next", []) => Command::Jump(DevJump::Next),
        ("prev", []) => Command::Jump(DevJump::Previous),
        ("jump", [n]) => Command::Jump(DevJump::To(
            n.parse().map_err(|_| format!("not a question number: {n}"))?,
        )),
        ("status", []) => Command::Status,
        ("reset", []) => Command::Reset,
        ("help", _) | ("?", _) => Command::Help,
        ("quit", []) | ("exit", []) => Command::Quit,
        (other, _) => return Err(format!("unknown command: {other} (type `help`)")),
    };
    Ok(command)
}

/// Collaborators shared by every engine the console starts.
struct Runtime {
    config: SeesayConfig,
    catalog: Arc<Catalog>,
    client: Arc<AssetClient>,
    persistence: Persistence,
    microphone: Arc<dyn CaptureDevice>,
    session_microphone: Arc<dyn CaptureDevice>,
    sink: Arc<JsonFileSink>,
}

impl Runtime {
    async fn start_engine(&self) -> Result<(SessionEngine, JoinHandle<()>)> {
        let deps = SessionDeps {
            persistence: self.persistence.clone(),
            assets: self.config.asset_layout(),
            fetcher: self.client.clone(),
            masks: self.client.clone(),
            microphone: Arc::clone(&self.microphone),
            session_microphone: Arc::clone(&self.session_microphone),
            sink: self.sink.clone(),
        };
        let engine = SessionEngine::start(
            Arc::clone(&self.catalog),
            deps,
            self.config.session_config(),
        )
        .await?;
        let preload = ImagePreloadQueue::spawn(engine.preload());
        Ok((engine, preload))
    }
}

pub async fn execute(options: RunOptions) -> Result<()> {
    let mut config = super::config_with_store(options.config.as_deref(), options.store)?;
    if let Some(catalog) = options.catalog {
        config.catalog = catalog;
    }
    if let Some(assets) = options.assets {
        config.asset_base = assets;
    }
    if let Some(output) = options.output {
        config.output_dir = output;
    }

    let client = Arc::new(AssetClient::new()?);
    let catalog = Arc::new(client.load_catalog(&config.catalog).await?);

    let (microphone, session_microphone) = if options.no_mic {
        (
            SilentCaptureDevice::new("microphone").denying(),
            SilentCaptureDevice::new("session microphone").denying(),
        )
    } else {
        (
            SilentCaptureDevice::new("microphone"),
            SilentCaptureDevice::new("session microphone"),
        )
    };

    let runtime = Runtime {
        persistence: Persistence::new(Arc::new(JsonFileStore::open(&config.store_path))),
        sink: Arc::new(JsonFileSink::new(&config.output_dir)),
        microphone: Arc::new(microphone),
        session_microphone: Arc::new(session_microphone),
        client,
        catalog,
        config,
    };

    tracing::info!(
        "session state in {}, reports in {}",
        runtime.config.store_path.display(),
        runtime.config.output_dir.display()
    );
    let (mut engine, mut preload) = runtime.start_engine().await?;
    println!("See&Say console. Type `help` for commands.");
    show(&engine);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_status = engine.recording_status();
    let mut was_ready = engine.is_current_ready();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        println!("  ! {message}");
                        continue;
                    }
                };
                match command {
                    Command::Quit => break,
                    Command::Reset => {
                        preload.abort();
                        engine.reset_all().await;
                        println!("Session reset.");
                        (engine, preload) = runtime.start_engine().await?;
                        show(&engine);
                    }
                    command => {
                        let before = engine.phase();
                        handle(&mut engine, command).await;
                        if engine.phase() != before {
                            show(&engine);
                        }
                    }
                }
                last_status = engine.recording_status();
                was_ready = engine.is_current_ready();
            }
            _ = ticker.tick() => {
                engine.tick().await;
                let status = engine.recording_status();
                if status != last_status {
                    print_recording_status(status);
                    last_status = status;
                }
                let ready = engine.is_current_ready();
                if ready && !was_ready {
                    println!("  Images ready.");
                }
                was_ready = ready;
            }
        }
    }

    preload.abort();
    Ok(())
}

async fn handle(engine: &mut SessionEngine, command: Command) {
    let result = match command {
        Command::Age { years, months, id } => {
            engine.submit_gate(&years, &months, &id).map(|_| ())
        }
        Command::Allow => engine.allow_microphone().await.map(|notice| {
            if let Some(notice) = notice {
                println!("  {notice}");
            }
        }),
        Command::Skip => engine.skip_microphone().await,
        Command::Click { image, point } => engine.click(image, point).map(|outcome| {
            match outcome {
                ClickOutcome::Ignored => println!("  (no effect)"),
                ClickOutcome::Registered { correct: true } => println!("  Correct!"),
                ClickOutcome::Registered { correct: false } => println!("  Not yet."),
            }
            print_images(engine);
        }),
        Command::Hint => engine.toggle_hint().map(|_| match engine.visible_hint() {
            Some(hint) => println!("  Hint: {hint}"),
            None => println!("  Hint hidden."),
        }),
        Command::Pause => engine.toggle_pause().map(|_| ()),
        Command::Stop => engine.stop_recording().await.map(|stopped| {
            if stopped {
                if let Some(artifact) = engine.recorder().artifact() {
                    println!("  Recorded {} bytes ({}).", artifact.len(), artifact.mime_type);
                }
            }
        }),
        Command::Redo => engine.redo_recording().await,
        Command::Grade(outcome) => engine.handle_continue(outcome).await.map(|_| ()),
        Command::Dev => {
            let on = engine.toggle_dev_mode();
            println!("  Dev mode {}.", if on { "on" } else { "off" });
            Ok(())
        }
        Command::Jump(jump) => engine.dev_jump(jump).await.map(|_| ()),
        Command::Status => {
            print_status(engine);
            Ok(())
        }
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Reset | Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("  ! {e}");
    }
}

fn show(engine: &SessionEngine) {
    match engine.phase() {
        Phase::Gate => {
            println!("Enter the child's age and 9-digit id: age <years> <months> <id>");
        }
        Phase::Rejected => {
            println!("This test is intended for children aged 2 to 6. Type `reset` to start over.");
        }
        Phase::Consent => {
            println!("Record audio during the test? Type `allow` or `skip`.");
        }
        Phase::Loop { .. } => {
            let Some(question) = engine.current_question() else {
                return;
            };
            println!();
            println!("{} [{}]", engine.progress(), question.query_type);
            println!("  {}", question.text);
            if question.hint_text().is_some() {
                println!(
                    "  Hint available ({}): type `hint`",
                    engine.assets().chest_url()
                );
            }
            if !engine.is_current_ready() {
                println!("  Loading images...");
            }
            print_images(engine);
            print_recording_status(engine.recording_status());
        }
        Phase::Completed => {
            println!();
            if let Some(text) = engine.completion_text() {
                println!("{text}");
            }
        }
    }
}

fn print_images(engine: &SessionEngine) {
    let feedback = engine.feedback();
    let images: Vec<String> = feedback
        .iter()
        .map(|f| {
            let marker = if f.inert {
                "x"
            } else if f.celebrate {
                "*"
            } else if f.highlighted {
                "+"
            } else {
                ""
            };
            format!("[{}{marker}]", f.index)
        })
        .collect();
    if !images.is_empty() {
        println!("  Images: {}", images.join(" "));
    }
    if feedback.iter().any(|f| f.celebrate) {
        println!("  Celebration: {}", engine.assets().fireworks_url());
    }
}

fn print_recording_status(status: RecordingStatus) {
    match status {
        RecordingStatus::Idle | RecordingStatus::Disabled => {}
        status => println!("  Recording: {status}"),
    }
}

fn print_status(engine: &SessionEngine) {
    let state = engine.state();
    println!("  Phase: {}", engine.phase().kind());
    if matches!(engine.phase(), Phase::Loop { .. }) {
        println!("  {}", engine.progress());
    }
    println!(
        "  Tally: {} correct, {} partial, {} wrong",
        state.tally.correct, state.tally.partial, state.tally.wrong
    );
    println!("  Recording: {}", engine.recording_status());
    println!(
        "  Session recording: {} ({} slices)",
        if engine.session_recorder().is_active() {
            "active"
        } else {
            "off"
        },
        engine.session_recorder().slice_count()
    );
    println!("  Grading: {}", if engine.can_continue() { "open" } else { "locked" });
    if state.dev_mode {
        println!("  Dev mode: on");
    }
}

fn print_help() {
    println!("  age <years> <months> <id>   enter age and respondent id");
    println!("  allow | skip                 microphone consent");
    println!("  click <n> [x y w h]          click image n (optionally at a point)");
    println!("  hint                         show or hide the hint");
    println!("  pause | stop | redo          control the answer recording");
    println!("  grade success|partial|failure");
    println!("  dev, next, prev, jump <n>    dev-mode navigation");
    println!("  status | reset | quit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gate_and_consent() {
        assert_eq!(
            parse_command("age 4 2 123456789").unwrap(),
            Command::Age {
                years: "4".into(),
                months: "2".into(),
                id: "123456789".into(),
            }
        );
        assert!(parse_command("age 4").is_err());
        assert_eq!(parse_command("ALLOW").unwrap(), Command::Allow);
        assert_eq!(parse_command("  skip ").unwrap(), Command::Skip);
    }

    #[test]
    fn parses_clicks() {
        assert_eq!(
            parse_command("click 2").unwrap(),
            Command::Click {
                image: 2,
                point: None
            }
        );
        assert_eq!(
            parse_command("click 1 10 20 300 200").unwrap(),
            Command::Click {
                image: 1,
                point: Some(ClickPoint {
                    x: 10.0,
                    y: 20.0,
                    display_width: 300.0,
                    display_height: 200.0,
                }),
            }
        );
        assert!(parse_command("click two").is_err());
        assert!(parse_command("click 1 10 20").is_err());
    }

    #[test]
    fn parses_grades_and_navigation() {
        assert_eq!(
            parse_command("grade help").unwrap(),
            Command::Grade(GradeOutcome::Partial)
        );
        assert!(parse_command("grade maybe").is_err());
        assert_eq!(parse_command("next").unwrap(), Command::Jump(DevJump::Next));
        assert_eq!(
            parse_command("jump 7").unwrap(),
            Command::Jump(DevJump::To(7))
        );
        assert!(parse_command("dance").is_err());
        assert!(parse_command("").is_err());
    }
}
