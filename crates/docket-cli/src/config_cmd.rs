use crate::config::{Config, ConfigError, ConfigPaths};
use clap::Args;
use std::process::Command;

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Print config with secrets redacted
    #[arg(long)]
    pub print: bool,

    /// Print the built-in prompt templates
    #[arg(long)]
    pub print_prompts: bool,

    /// Edit config in $EDITOR
    #[arg(long)]
    pub edit: bool,

    /// Set a config value (dotted key=value)
    #[arg(long, value_name = "key=value")]
    pub set: Vec<String>,
}

pub fn run(args: &ConfigArgs, paths: &ConfigPaths) -> Result<(), ConfigError> {
    if args.edit && (!args.set.is_empty() || args.print) {
        return Err(ConfigError::Validation(
            "--edit cannot be combined with --set or --print".into(),
        ));
    }

    let mut config = Config::load_or_create(paths)?;

    if args.print_prompts {
        let prompts = config.prompts.load(paths)?;
        println!("# summarize\n{}\n\n# format\n{}", prompts.summarize, prompts.format);
        return Ok(());
    }

    if args.edit {
        edit_config(paths)?;
        config = Config::load(paths)?;
        config.validate(paths)?;
        return Ok(());
    }

    if !args.set.is_empty() {
        for assignment in &args.set {
            apply_set(&mut config, assignment)?;
        }
        config.validate(paths)?;
        Config::write(paths, &config)?;
    }

    if args.print || (args.set.is_empty() && !args.edit) {
        let redacted = config.redacted();
        let output = toml::to_string_pretty(&redacted)?;
        println!("{output}");
    }

    Ok(())
}

fn edit_config(paths: &ConfigPaths) -> Result<(), ConfigError> {
    let editor = std::env::var("EDITOR")
        .map_err(|_| ConfigError::Validation("$EDITOR not set; use --set or set EDITOR".into()))?;
    let parts = split_editor_command(&editor)?;
    let (program, args) = parts
        .split_first()
        .ok_or_else(|| ConfigError::Validation("$EDITOR is empty".into()))?;
    let status = Command::new(program)
        .args(args)
        .arg(&paths.config_path)
        .status()
        .map_err(ConfigError::Io)?;
    if !status.success() {
        return Err(ConfigError::Validation(
            "editor exited with a non-zero status".into(),
        ));
    }
    Ok(())
}

fn split_editor_command(editor: &str) -> Result<Vec<String>, ConfigError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = editor.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
            }
            '"' if !in_single => {
                in_double = !in_double;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ch if ch.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() {
                    parts.push(current.clone());
                    current.clear();
                }
            }
            _ => current.push(ch),
        }
    }

    if in_single || in_double {
        return Err(ConfigError::Validation(
            "$EDITOR has unmatched quotes".into(),
        ));
    }
    if !current.is_empty() {
        parts.push(current);
    }

    if parts.is_empty() {
        return Err(ConfigError::Validation("$EDITOR is empty".into()));
    }

    Ok(parts)
}

fn apply_set(config: &mut Config, assignment: &str) -> Result<(), ConfigError> {
    let (key, value) = assignment
        .split_once('=')
        .ok_or_else(|| ConfigError::Validation("expected key=value for --set".into()))?;
    let key = key.trim();
    let value = value.trim();
    match key {
        "model.active" => {
            config.model.active = value.to_string();
        }
        "model.load_timeout_secs" => {
            config.model.load_timeout_secs = parse_u64(value, key)?;
        }
        "model.max_tokens" => {
            config.model.max_tokens = parse_u32(value, key)?;
        }
        "model.provider" | "model.model" | "model.base_url" | "model.api_key" => {
            let active = config.model.active.clone();
            let profile = match active.as_str() {
                "local" | "server" => config.model.profile_mut(&active),
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "{key} cannot be set because active profile is invalid"
                    )));
                }
            };
            set_profile_field(profile, &key["model.".len()..], value);
        }
        _ => {
            if let Some((mode, field)) = key
                .strip_prefix("model.")
                .and_then(|rest| rest.split_once('.'))
                .filter(|(mode, _)| matches!(*mode, "local" | "server"))
            {
                let profile = config.model.profile_mut(mode);
                if !set_profile_field(profile, field, value) {
                    return Err(unknown_key(key));
                }
                return Ok(());
            }
            apply_set_other(config, key, value)?;
        }
    }
    Ok(())
}

fn apply_set_other(config: &mut Config, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "columns.date" => config.columns.date = value.to_string(),
        "columns.section" => config.columns.section = value.to_string(),
        "columns.item" => config.columns.item = value.to_string(),
        "columns.notes" => config.columns.notes = value.to_string(),
        "columns.include" => config.columns.include = value.to_string(),
        "prompts.summarize_file" => config.prompts.summarize_file = value.to_string(),
        "prompts.format_file" => config.prompts.format_file = value.to_string(),
        "prompts.ignore_brackets" => {
            config.prompts.ignore_brackets = parse_bool(value, key)?;
        }
        "output.export_dir" => config.output.export_dir = value.to_string(),
        _ => return Err(unknown_key(key)),
    }
    Ok(())
}

fn set_profile_field(
    profile: &mut crate::config::ProviderConfig,
    field: &str,
    value: &str,
) -> bool {
    let slot = match field {
        "provider" => &mut profile.provider,
        "model" => &mut profile.model,
        "base_url" => &mut profile.base_url,
        "api_key" => &mut profile.api_key,
        _ => return false,
    };
    *slot = value.to_string();
    true
}

fn unknown_key(key: &str) -> ConfigError {
    ConfigError::Validation(format!("unknown config key: {key}"))
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::Validation(format!(
            "{key} expects true or false"
        ))),
    }
}

fn parse_u32(value: &str, key: &str) -> Result<u32, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{key} expects an unsigned integer")))
}

fn parse_u64(value: &str, key: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{key} expects an unsigned integer")))
}

#[cfg(test)]
mod tests {
    use super::{apply_set, split_editor_command};
    use crate::config::Config;

    #[test]
    fn split_editor_command_handles_args() {
        let parts = split_editor_command("code --wait").unwrap();
        assert_eq!(parts, vec!["code", "--wait"]);
    }

    #[test]
    fn split_editor_command_handles_quotes() {
        let parts = split_editor_command("\"/Applications/VS Code\" --wait").unwrap();
        assert_eq!(parts, vec!["/Applications/VS Code", "--wait"]);
    }

    #[test]
    fn split_editor_command_rejects_unmatched_quotes() {
        let err = split_editor_command("\"unterminated").unwrap_err();
        assert!(err.to_string().contains("unmatched quotes"));
    }

    #[test]
    fn apply_set_targets_active_profile() {
        let mut config = Config::default();
        apply_set(&mut config, "model.active=server").unwrap();
        apply_set(&mut config, "model.model=qwen3-8b").unwrap();
        apply_set(&mut config, "model.local.base_url=http://gpu:11434").unwrap();
        assert_eq!(config.model.server.model, "qwen3-8b");
        assert_eq!(config.model.local.base_url, "http://gpu:11434");
        assert_eq!(config.model.local.model, "qwen3:30b-a3b");
    }

    #[test]
    fn apply_set_handles_other_sections() {
        let mut config = Config::default();
        apply_set(&mut config, "columns.notes=Comments").unwrap();
        apply_set(&mut config, "prompts.ignore_brackets=true").unwrap();
        apply_set(&mut config, "model.max_tokens=2048").unwrap();
        assert_eq!(config.columns.notes, "Comments");
        assert!(config.prompts.ignore_brackets);
        assert_eq!(config.model.max_tokens, 2048);

        assert!(apply_set(&mut config, "prompts.ignore_brackets=yes").is_err());
        assert!(apply_set(&mut config, "model.local.colour=red").is_err());
        assert!(apply_set(&mut config, "audio.sample_rate=16000").is_err());
        assert!(apply_set(&mut config, "no-equals").is_err());
    }

    #[test]
    fn apply_set_rejects_invalid_active_profile() {
        let mut config = Config::default();
        config.model.active = "cloud".to_string();
        let err = apply_set(&mut config, "model.model=x").unwrap_err();
        assert!(err.to_string().contains("active profile is invalid"));
    }
}
