//! Config subcommand handlers.

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use stowage_config::{self as config, Config, Profile, StoreSection};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with header values masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        for value in profile.headers.values_mut() {
            "****".clone_into(value);
        }
    }
    cfg
}

fn render_config(cfg: &Config, format: &OutputFormat) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            serde_json::to_string_pretty(cfg).expect("serialization should not fail")
        }
        OutputFormat::Yaml => serde_yaml::to_string(cfg).expect("serialization should not fail"),
        OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(cfg)?,
    })
}

#[derive(Tabled, Serialize)]
struct ProfileRow {
    #[tabled(rename = "")]
    active: &'static str,
    name: String,
    uri: String,
    key: String,
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            output::print_output(&render_config(&redacted(&cfg), &global.output)?, global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.clone().unwrap_or_default();
            let mut rows: Vec<ProfileRow> = cfg
                .profiles
                .iter()
                .map(|(name, p)| ProfileRow {
                    active: if *name == default { "*" } else { "" },
                    name: name.clone(),
                    uri: p.uri.clone().unwrap_or_default(),
                    key: p.store.key.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));

            let out = match global.output {
                OutputFormat::Table => Table::new(&rows).with(Style::rounded()).to_string(),
                OutputFormat::Plain => rows
                    .iter()
                    .map(|r| r.name.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
                OutputFormat::Json | OutputFormat::JsonCompact => {
                    serde_json::to_string_pretty(&rows).expect("serialization should not fail")
                }
                OutputFormat::Yaml => {
                    serde_yaml::to_string(&rows).expect("serialization should not fail")
                }
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init {
            name,
            uri,
            key,
            force,
        } => {
            let path = config::config_path();
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let profile = Profile {
                uri,
                store: StoreSection {
                    key,
                    ..StoreSection::default()
                },
                ..Profile::default()
            };
            Config::profile_uri(&profile)?;

            let mut cfg = Config {
                default_profile: Some(name.clone()),
                ..Config::default()
            };
            cfg.profiles.insert(name.clone(), profile);
            let written = config::save_config(&cfg)?;

            tracing::info!(profile = %name, path = %written.display(), "config written");
            output::print_output(
                &format!("Wrote profile '{name}' to {}", written.display()),
                global.quiet,
            );
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_header_values() {
        let mut cfg = Config::default();
        let mut profile = Profile::default();
        profile
            .headers
            .insert("Authorization".into(), "Bearer secret".into());
        cfg.profiles.insert("p".into(), profile);

        let out = render_config(&redacted(&cfg), &OutputFormat::Table).unwrap();
        assert!(out.contains("****"));
        assert!(!out.contains("secret"));
    }
}
