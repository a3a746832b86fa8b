use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info, warn};
use trackdb::{Catalog, Noticed, OpenOptions, UpgradePolicy, UpgradeProgram};
use walkdir::WalkDir;

mod args;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = args::parse()?;
    args::init_logging(options.debug);
    let stop = Arc::new(AtomicBool::new(false));
    watch_signals(stop.clone())?;

    let mut check = true;
    let mut roots = Vec::new();
    for arg in &options.args {
        match arg.as_str() {
            "--check" | "-K" => check = true,
            "--no-check" => check = false,
            other if other.starts_with('-') => return Err(format!("invalid option {}", other).into()),
            other => roots.push(other.trim_end_matches('/').to_string()),
        }
    }

    let config = args::load_config(&options.config_path)?;
    let db_path = config.db_path(&options.config_path);
    let open = OpenOptions {
        upgrade: UpgradePolicy::Run(UpgradeProgram::new(&config, &options.config_path, options.debug)),
        ..OpenOptions::default()
    };
    let catalog = Catalog::open(config, &db_path, open)?;

    let collections: Vec<String> = catalog.names().roots().to_vec();
    for root in &roots {
        if !collections.contains(root) {
            return Err(format!("{} is not a collection root", root).into());
        }
    }
    let targets = if roots.is_empty() { collections } else { roots };

    for root in &targets {
        if !rescan_collection(&catalog, root, &stop)? {
            info!("Rescan stopped");
            return Ok(());
        }
    }
    if check && !recheck(&catalog, &targets, &stop)? {
        info!("Rescan stopped");
    }
    Ok(())
}

/// Sets `stop` on SIGTERM or SIGINT. The handlers are in place on return.
#[cfg(unix)]
fn watch_signals(stop: Arc<AtomicBool>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (mut term, mut int) = {
        let _guard = runtime.enter();
        (signal(SignalKind::terminate())?, signal(SignalKind::interrupt())?)
    };
    thread::spawn(move || {
        runtime.block_on(async {
            tokio::select! {
                _ = term.recv() => info!("Received SIGTERM"),
                _ = int.recv() => info!("Received SIGINT"),
            }
        });
        stop.store(true, Ordering::SeqCst);
    });
    Ok(())
}

#[cfg(not(unix))]
fn watch_signals(stop: Arc<AtomicBool>) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::spawn(move || {
        if let Err(err) = runtime.block_on(tokio::signal::ctrl_c()) {
            warn!("Failed to listen for ctrl-c: {}", err);
            return;
        }
        info!("Received ctrl-c");
        stop.store(true, Ordering::SeqCst);
    });
    Ok(())
}

fn is_track(catalog: &Catalog, path: &Path) -> bool {
    let name = match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => name.to_ascii_lowercase(),
        None => return false,
    };
    catalog
        .config()
        .extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
}

/// Notices every track under `root`; false if `stop` cut it short.
fn rescan_collection(catalog: &Catalog, root: &str, stop: &AtomicBool) -> trackdb::Result<bool> {
    info!("Rescanning {}", root);
    let mut tracks = 0u64;
    let mut created = 0u64;
    for entry in WalkDir::new(root).follow_links(true) {
        if stop.load(Ordering::SeqCst) {
            info!("Stopped rescanning {} after {} tracks", root, tracks);
            return Ok(false);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", root, err);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_track(catalog, entry.path()) {
            continue;
        }
        let path = match entry.path().to_str() {
            Some(path) => path,
            None => {
                error!("Track path is not UTF-8: {:?}", entry.path());
                continue;
            }
        };
        if catalog.notice(path, path)? == Noticed::Created {
            created += 1;
        }
        tracks += 1;
    }
    info!("rescanned {}, {} tracks, {} new", root, tracks, created);
    Ok(true)
}

/// Obsoletes tracks whose files have gone.
fn recheck(catalog: &Catalog, roots: &[String], stop: &AtomicBool) -> trackdb::Result<bool> {
    info!("Checking for obsolete tracks");
    let mut gone = Vec::new();
    for root in roots {
        catalog.scan(Some(root.as_str()), |found| {
            let path = found.data.get("_path").unwrap_or(found.track.as_str());
            if !Path::new(path).exists() {
                gone.push(found.track.clone());
            }
            ControlFlow::Continue(())
        })?;
    }
    for (done, track) in gone.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            info!("Obsoleted {} of {} tracks", done, gone.len());
            return Ok(false);
        }
        catalog.obsolete(track)?;
    }
    info!("Obsoleted {} tracks", gone.len());
    Ok(true)
}
