//! Command handlers and the shared store setup they use.

pub mod config_cmd;
pub mod fetch;
pub mod join;

use std::sync::Arc;
use std::time::Duration;

use stowage_api::{HttpClient, TlsMode};
use stowage_config::{Config, Profile};
use stowage_core::{EventBus, Storage, StoreContext, StoreOptions};

use crate::cli::{GlobalOpts, StoreArgs};
use crate::error::CliError;

/// Everything a command needs to build stores: the resolved profile, its
/// store options and a context shared by every store the command creates.
pub struct Session {
    pub profile_name: String,
    pub profile: Profile,
    pub options: StoreOptions,
    pub context: StoreContext,
}

impl Session {
    /// Resolve config, profile and CLI overrides into a ready context.
    pub fn open(global: &GlobalOpts, args: &StoreArgs) -> Result<Self, CliError> {
        let cfg = stowage_config::load_config_or_default();
        let (profile_name, profile) = cfg.profile(global.profile.as_deref()).map_err(|e| {
            match CliError::from(e) {
                CliError::ProfileNotFound { name, .. } => CliError::ProfileNotFound {
                    name,
                    available: available_profiles(&cfg),
                },
                other => other,
            }
        })?;

        let mut transport = cfg.transport_config(&profile);
        if global.insecure {
            transport.tls = TlsMode::DangerAcceptInvalid;
        }
        if let Some(secs) = global.timeout {
            transport.timeout = Duration::from_secs(secs);
        }

        let mut options = cfg.store_options(&profile)?;
        apply_store_args(&mut options, args)?;

        let client = HttpClient::new(&transport)?;
        let storage = Storage::new(&cfg.storage_settings());
        tracing::debug!(
            profile = %profile_name,
            key = ?options.key,
            retrieve = options.retrieve,
            max_depth = options.max_depth,
            "session opened"
        );

        Ok(Self {
            profile_name,
            profile,
            options,
            context: StoreContext::new(Arc::new(client), EventBus::new(), Arc::new(storage)),
        })
    }
}

fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort();
    names.join(", ")
}

fn apply_store_args(options: &mut StoreOptions, args: &StoreArgs) -> Result<(), CliError> {
    if let Some(ref key) = args.key {
        options.key = Some(key.clone());
    }
    if let Some(ref source) = args.source {
        options.source = Some(source.clone());
    }
    if args.retrieve {
        options.retrieve = true;
    }
    if let Some(depth) = args.max_depth {
        options.retrieve = true;
        options.max_depth = depth;
    }
    options.ignore.extend(args.ignore.iter().cloned());
    if let Some(ref callback) = args.callback {
        options.callback = Some(callback.clone());
    }
    for raw in &args.header {
        let (name, value) = parse_header(raw)?;
        options.headers.insert(name, value);
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String), CliError> {
    raw.split_once(':')
        .map(|(n, v)| (n.trim().to_owned(), v.trim().to_owned()))
        .filter(|(n, _)| !n.is_empty())
        .ok_or_else(|| CliError::Validation {
            field: "header".into(),
            reason: format!("expected \"Name: value\", got {raw:?}"),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn headers_split_on_first_colon() {
        let (name, value) = parse_header("Authorization: Bearer a:b").unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer a:b");
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": empty").is_err());
    }

    #[test]
    fn max_depth_implies_retrieve() {
        let mut options = StoreOptions::default();
        let args = StoreArgs {
            key: Some("id".into()),
            source: None,
            retrieve: false,
            max_depth: Some(3),
            ignore: vec!["owner".into()],
            callback: None,
            header: vec!["X-Trace: 1".into()],
        };
        apply_store_args(&mut options, &args).unwrap();
        assert!(options.retrieve);
        assert_eq!(options.max_depth, 3);
        assert_eq!(options.key.as_deref(), Some("id"));
        assert_eq!(options.ignore, ["owner"]);
        assert_eq!(options.headers["X-Trace"], "1");
    }
}
