use nebula::{ConfigPatch, SimulationConfig, Viewer};

/// Optional JSON config overrides, applied on top of the defaults before
/// the window opens. Unknown or out-of-range values clamp like any patch.
fn load_config() -> SimulationConfig {
    let mut config = SimulationConfig::default();
    let Ok(path) = std::env::var("NEBULA_CONFIG") else {
        return config;
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str::<ConfigPatch>(&text) {
            Ok(patch) => {
                config.apply(&patch);
                log::info!("applied config overrides from {path}");
            }
            Err(err) => log::warn!("ignoring {path}: {err}"),
        },
        Err(err) => log::warn!("ignoring {path}: {err}"),
    }
    config
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let first = args.next();

    // `nebula --set-token <token>` stores the depth-service token and exits.
    if first.as_deref() == Some("--set-token") {
        let Some(token) = args.next() else {
            eprintln!("usage: nebula --set-token <token>");
            std::process::exit(2);
        };
        if let Err(err) = nebula::credentials::save_token(&token) {
            eprintln!("could not save token: {err}");
            std::process::exit(1);
        }
        println!("depth-service token saved");
        return;
    }

    let mut viewer = Viewer::new().with_config(load_config());
    if let Some(path) = first {
        viewer = viewer.with_file(path);
    }

    if let Err(err) = viewer.run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}
