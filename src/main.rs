use clap::Parser;
use sigges_pilot::core::config::Config;
use sigges_pilot::{
    AutomationError, AutomationSession, ChromeBrowser, ErrorAction, LocatorCatalog, PortalState,
    RunControl, SessionTrait, WaitProfiles,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Open a session on the portal, log in and park on the home page.
#[derive(Debug, Parser)]
#[command(name = "sigges-pilot", version, about)]
struct Args {
    /// JSON configuration file.
    #[arg(short, long, default_value = "sigges-pilot.json")]
    config: PathBuf,

    /// JSON locator catalog replacing the built-in one.
    #[arg(long)]
    locators: Option<PathBuf>,

    /// JSON wait profiles layered over the built-in ones.
    #[arg(long)]
    wait_profiles: Option<PathBuf>,

    /// Run Chrome without a window.
    #[arg(long)]
    headless: bool,

    /// Portal URL override.
    #[arg(long)]
    url: Option<String>,

    /// Fresh browsers to try after the session is lost.
    #[arg(long, default_value_t = 2)]
    max_heals: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if args.headless {
        config.browser.headless = true;
    }
    if let Some(url) = args.url {
        config.portal.url = url;
    }
    config.validate()?;

    let _log_guard = sigges_pilot::logging::init(&config.logging);

    let catalog = match &args.locators {
        Some(path) => LocatorCatalog::load(path)?,
        None => LocatorCatalog::sigges_default(),
    };
    let profiles = match &args.wait_profiles {
        Some(path) => WaitProfiles::load(path)?,
        None => WaitProfiles::default(),
    };

    let run = Arc::new(RunControl::new());
    let browser = ChromeBrowser::launch(&config.browser)?;
    let mut session =
        AutomationSession::with_parts(browser, config.clone(), catalog, profiles, run.clone())?;

    run.start();
    session.set_context(None, Some("startup".to_string()));

    let mut heals = 0;
    loop {
        match reach_home(&session).await {
            Ok(true) => {
                let (alive, reason) = session.validate_connection().await;
                info!(alive, reason = %reason, "Ready on the home page");
                run.complete();
                return Ok(());
            }
            Ok(false) => {
                run.fail("home page unreachable");
                anyhow::bail!("could not reach the home page");
            }
            Err(e) => {
                let action = session.handle_error(&e);
                if action != ErrorAction::Heal || heals >= args.max_heals || !run.should_continue()
                {
                    run.fail(e.to_string());
                    return Err(e.into());
                }
                heals += 1;
                warn!(heals, "Relaunching browser");
                session.reattach(ChromeBrowser::launch(&config.browser)?).await?;
            }
        }
    }
}

async fn reach_home(session: &AutomationSession<ChromeBrowser>) -> Result<bool, AutomationError> {
    if !session.login(false).await? && !session.login(true).await? {
        error!("Login failed twice");
        return Ok(false);
    }
    session.ensure_state(PortalState::Home).await
}
