//! CLI front-end for the DELGA launcher backend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};

use delga_launcher::cli;
use delga_launcher::defaults::PULSE_INTERVAL;
use delga_launcher::engine_instance::DEFAULT_ENGINE_EXECUTABLE;
use delga_launcher::instance_process::ProcessInstanceFactory;
use delga_launcher::launcher::Launcher;
use delga_launcher::logging;
use delga_launcher::modules::ModuleStatus;
use delga_launcher::paths::LauncherPaths;

fn main() -> Result<()> {
    let matches = cli::parse_args();

    let paths = LauncherPaths::resolve();
    let launcher_log = paths.logs.join("delga-launcher.log");

    let executable = matches
        .get_one::<String>("engine_executable")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_EXECUTABLE));
    let use_console = matches.get_flag("console");

    let factory = ProcessInstanceFactory::new(executable, paths.logs.clone(), use_console);
    let mut launcher = Launcher::new(paths, Box::new(factory));

    logging::init(launcher.history.clone(), Some(&launcher_log))
        .context("initializing logging failed")?;

    launcher.prepare().context("launcher preparation failed")?;

    let result = match matches.subcommand() {
        Some(("games", _)) => {
            list_games(&launcher);
            Ok(())
        }
        Some(("modules", _)) => {
            list_modules(&launcher);
            Ok(())
        }
        Some(("patches", _)) => {
            list_patches(&launcher);
            Ok(())
        }
        Some(("profiles", _)) => {
            list_profiles(&launcher);
            Ok(())
        }
        Some(("run", sub)) => {
            let key = sub
                .get_one::<String>("game")
                .expect("argument is required")
                .clone();
            run_game(&mut launcher, &key)
        }
        _ => unreachable!("subcommand is required"),
    };

    launcher.shutdown();
    result
}

fn list_games(launcher: &Launcher) {
    for game in launcher.game_manager.games() {
        println!(
            "{}  {:24}  {}  [{}]",
            game.identifier_hex(),
            game.alias_identifier,
            game.title,
            if game.can_run { "ready" } else { "not runnable" }
        );
    }
}

fn list_modules(launcher: &Launcher) {
    for module in launcher.engine.modules.iter() {
        let kind = module
            .kind
            .map(|k| k.display_name())
            .unwrap_or("Unknown");
        let status = match module.status {
            ModuleStatus::Ready => "ready",
            ModuleStatus::Broken => "broken",
            ModuleStatus::NotTested => "not tested",
        };
        println!(
            "{:14}  {:24} {:8}  {}",
            kind, module.name, module.version, status
        );
    }
}

fn list_patches(launcher: &Launcher) {
    for patch in launcher.patch_manager.patches().iter() {
        println!(
            "{}  {:24}  targets {}",
            patch.identifier_hex(),
            patch.name,
            patch
                .game_id
                .map(|id| id.simple().to_string())
                .unwrap_or_default()
        );
    }
}

fn list_profiles(launcher: &Launcher) {
    let active = launcher.game_manager.active_profile_name.as_deref();
    for profile in launcher.game_manager.profiles.iter() {
        println!(
            "{:24}  {}{}",
            profile.name,
            if profile.valid { "valid" } else { "invalid" },
            if active == Some(profile.name.as_str()) {
                "  (active)"
            } else {
                ""
            }
        );
    }
}

/// Start the game and poll it until it exits. The first Ctrl+C asks the game
/// to quit; a second one kills it.
fn run_game(launcher: &mut Launcher, key: &str) -> Result<()> {
    launcher
        .start_game(key)
        .with_context(|| format!("starting game '{}' failed", key))?;

    let interrupts = Arc::new(AtomicBool::new(false));
    let interrupt_count = Arc::new(AtomicBool::new(false));
    {
        let interrupts = interrupts.clone();
        ctrlc::set_handler(move || {
            interrupts.store(true, Ordering::SeqCst);
        })
        .context("installing the Ctrl+C handler failed")?;
    }

    info!("Game '{}' started", key);
    loop {
        launcher.pulse_checking();
        if !launcher.has_running_games() {
            break;
        }

        if interrupts.swap(false, Ordering::SeqCst) {
            if interrupt_count.swap(true, Ordering::SeqCst) {
                warn!("Second interrupt, killing the game");
                launcher.kill_running_games();
                break;
            }
            info!("Interrupt received, asking the game to quit");
            if let Err(err) = launcher.stop_game(key) {
                error!("Stopping the game failed: {}", err);
                launcher.kill_running_games();
                break;
            }
            // stop already ran the post-game exchange
            break;
        }

        std::thread::sleep(PULSE_INTERVAL);
    }

    info!("Game '{}' finished", key);
    Ok(())
}
