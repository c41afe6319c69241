use clap::Parser;
use eyre::{Context, Result};

use crate::config::{self, Configuration, load_configuration, lookup_config_path};

#[derive(Debug, Parser)]
#[command(
    version,
    about,
    long_about = r#"A persona-driven chat client for OpenAI compatible models

Default configuration file location looks up in the following order:
    * $SECRETARY_CONFIG_PATH
    * $XDG_CONFIG_HOME/secretary/config.toml
    * $HOME/.config/secretary/config.toml
    * $HOME/.secretary.toml
"#,
    disable_version_flag = true
)]
pub struct Command {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Persona to start with, overrides `general.default_persona`
    #[arg(short, long, value_name = "ID")]
    persona: Option<String>,

    /// Open an existing conversation instead of starting a new one
    #[arg(long, value_name = "ID")]
    conversation: Option<String>,

    /// Show the version
    #[arg(short, long)]
    version: bool,
}

impl Command {
    pub fn new() -> Command {
        Self::parse()
    }

    pub fn get_config(&self) -> Result<Configuration> {
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(|| lookup_config_path().unwrap_or_default());

        if config_path.is_empty() {
            // Without a file there are no connections nor personas
            return Ok(Configuration::default());
        }
        load_configuration(config_path.as_str()).wrap_err("loading configuration")
    }

    pub fn persona(&self) -> Option<&str> {
        self.persona.as_deref()
    }

    pub fn conversation(&self) -> Option<&str> {
        self.conversation.as_deref()
    }

    pub fn version(&self) -> bool {
        self.version
    }

    pub fn print_version(&self) {
        println!("{}", config::version())
    }
}
