//! Missing plugin reporting and installation

use crate::mainloop::{LoopEvent, Scheduler};
use exaile_core::media::{InstallResult, InstallStart, MediaFramework};
use tracing::{debug, error, info, warn};

/// Where users are sent for help installing codecs
pub const MISSING_PLUGIN_URL: &str = "https://exaile.readthedocs.io/en/stable/user/faq.html";

/// Text shown to the user when a plugin for `description` is missing
pub fn user_message(description: &str) -> String {
    format!(
        "A GStreamer 1.x plugin for {} is missing. Without this software installed, \
         Exaile will not be able to play the current file. Please install the \
         required software on your computer. See {} for details.",
        description, MISSING_PLUGIN_URL
    )
}

/// Ask the platform installer for the plugin described by `detail`
///
/// The completion result arrives later as [`LoopEvent::PluginsInstalled`].
/// Returns true if the installer started.
pub fn run_installer(framework: &dyn MediaFramework, scheduler: &Scheduler, detail: &str) -> bool {
    let Some(installer) = framework.plugin_installer() else {
        warn!("Installation of GStreamer plugins not supported on this platform.");
        return false;
    };

    info!("Prompting user to install missing codec(s): {}", detail);

    let scheduler = scheduler.clone();
    let start = installer.install(
        &[detail.to_string()],
        Box::new(move |result| scheduler.post(LoopEvent::PluginsInstalled(result))),
    );
    debug!(?start, "Plugin installer start result");

    match start {
        InstallStart::Started => {
            info!("Started codec installation");
            true
        }
        InstallStart::HelperMissing => {
            warn!("Automatic codec installation not supported (helper script missing)");
            false
        }
        InstallStart::InstallInProgress => {
            warn!("Cannot install codec: another installation is already in progress");
            false
        }
        InstallStart::InternalFailure => {
            error!("Internal failure starting codec installation");
            false
        }
    }
}

/// Log how an installation finished
pub fn log_install_result(result: InstallResult) {
    match result {
        InstallResult::Success | InstallResult::PartialSuccess => {
            debug!(?result, "Codec installation finished");
        }
        InstallResult::NotFound => warn!("No installation candidate for missing plugin found."),
        InstallResult::UserAbort => info!("Codec installation aborted."),
        InstallResult::Error | InstallResult::Crashed | InstallResult::InternalFailure => {
            error!(?result, "Codec installation failed")
        }
    }
}
