//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::path::Path;

use updater_common::config::CommandTemplates;

use crate::exec::shell_quote;

const PACKAGE_PLACEHOLDER: &str = "{package}";
const PATH_PLACEHOLDER: &str = "{path}";

/// Renders the platform's package-manager command lines.
#[derive(Debug, Clone)]
pub struct PackageCommands {
    templates: CommandTemplates,
}

impl PackageCommands {
    pub fn new(templates: CommandTemplates) -> Self {
        Self { templates }
    }

    /// Reinstall over the existing application, keeping its data.
    pub fn install(&self, artifact: &Path) -> String {
        let path = artifact.display().to_string();
        render(&self.templates.install, PATH_PLACEHOLDER, &path)
    }

    pub fn force_stop(&self, application_id: &str) -> String {
        render(&self.templates.force_stop, PACKAGE_PLACEHOLDER, application_id)
    }

    /// Launch the application's main launcher entry.
    pub fn launch(&self, application_id: &str) -> String {
        render(&self.templates.launch, PACKAGE_PLACEHOLDER, application_id)
    }

    pub fn disable_package(&self, application_id: &str) -> String {
        render(
            &self.templates.disable_package,
            PACKAGE_PLACEHOLDER,
            application_id,
        )
    }

    pub fn query_version(&self, application_id: &str) -> String {
        render(
            &self.templates.query_version,
            PACKAGE_PLACEHOLDER,
            application_id,
        )
    }

    pub fn query_elevated(&self) -> bool {
        self.templates.query_elevated
    }
}

impl Default for PackageCommands {
    fn default() -> Self {
        Self::new(CommandTemplates::default())
    }
}

fn render(template: &str, placeholder: &str, value: &str) -> String {
    template.replace(placeholder, &shell_quote(value))
}
