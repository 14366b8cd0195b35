//! Config subcommand handlers.

use std::io::{self, BufRead};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Profile};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_file(global);

    match args.command {
        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load(global)?.redacted();
            let out = output::render_single(
                global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("{c:#?}\n# {e}")),
                |c| c.active_profile_name(global.profile.as_deref()),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init {
            broker,
            namespace,
            force,
        } => {
            let mut cfg = config::load(global)?;
            let name = global.profile.clone().unwrap_or_else(|| "default".into());
            if cfg.profiles.contains_key(&name) && !force {
                return Err(CliError::Validation {
                    field: "profile".into(),
                    reason: format!("'{name}' already exists (use --force)"),
                });
            }
            broker.parse::<url::Url>().map_err(|e| CliError::Validation {
                field: "broker".into(),
                reason: format!("invalid URL '{broker}': {e}"),
            })?;

            let mut profile = Profile::new(broker);
            profile.namespace = namespace;
            cfg.profiles.insert(name.clone(), profile);
            if cfg.profiles.len() == 1 {
                cfg.default_profile = Some(name.clone());
            }

            config::save_config_to(&cfg, &path)?;
            if !global.quiet {
                eprintln!("✓ Profile '{name}' written to {}", path.display());
                eprintln!("  Add [[profiles.{name}.channels]] entries, then run: teleboard watch");
            }
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let default = cfg.active_profile_name(None);
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: teleboard config init");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if *name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ──────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load(global)?;
            cfg.profile(&name)?;
            cfg.default_profile = Some(name.clone());
            config::save_config_to(&cfg, &path)?;
            if !global.quiet {
                eprintln!("✓ Default profile set to '{name}'");
            }
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword => {
            let cfg = config::load(global)?;
            let name = config::active_profile_name(global, &cfg);
            cfg.profile(&name)?;

            let mut secret = String::new();
            io::stdin().lock().read_line(&mut secret)?;
            let secret = secret.trim_end_matches(['\r', '\n']);
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            config::store_password(&name, secret)?;
            if !global.quiet {
                eprintln!("✓ Password stored in system keyring for profile '{name}'");
            }
            Ok(())
        }
    }
}
