//! `kfd`: command-line key fill device.
//!
//! Manages encrypted key containers and runs manual rekey operations against
//! a P25 radio, either through a KFD adapter exposed on a TCP port or through
//! the WebSocket network relay.
//!
//! # Usage
//!
//! ```text
//! kfd container --file keys.ekc new
//! kfd container --file keys.ekc add-key --name "patrol tek" --sln 100 --key-id 1 --alg 0x84 --key 00112233…
//! kfd container --file keys.ekc add-group --name patrol --keys 1,2,3
//!
//! kfd radio --tcp 127.0.0.1:5000 check
//! kfd radio --tcp 127.0.0.1:5000 --adapter kfd-micro view-keys
//! kfd radio --relay ws://relay:8080 --target-ip 10.0.0.7 --motorola load-group --file keys.ekc --group 1
//!
//! kfd config init
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable        | Description                                 |
//! |-----------------|---------------------------------------------|
//! | `KFD_CONFIG`    | Config file path                            |
//! | `KFD_LOG`       | `tracing` filter (also `RUST_LOG`)          |
//! | `KFD_PASSWORD`  | Container password                          |
//! | `KFD_RELAY_URL` | Relay URL when `--relay` has no value       |
//! | `KFD_TARGET_IP` | Radio address behind the relay              |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use kfd_core::domain::algorithm::{algorithm_name, AlgorithmId};
use kfd_core::{AdapterModel, CmdKeyItem, KeyEntry, KeyType, OperationStatus, Rsi};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kfd_host::application::{check_load_item, ContainerService, ManualRekeyApplication, SessionProtocol};
use kfd_host::infrastructure::relay::RelayTransport;
use kfd_host::infrastructure::session::{DliProtocol, DliVariant, ThreeWireProtocol};
use kfd_host::infrastructure::storage::config::{config_file_path, load_config, save_config, HostConfig};
use kfd_host::infrastructure::transport::stream::StreamTransport;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// P25 key fill device.
#[derive(Debug, Parser)]
#[command(name = "kfd", about = "Manual rekey and key container tool for P25 radios", version)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true, env = "KFD_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overriding the config file's `log_level`.
    #[arg(long, global = true, env = "KFD_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Edit an encrypted key container.
    Container(ContainerArgs),
    /// Talk to a radio.
    Radio(RadioArgs),
    /// Manage the configuration file.
    #[command(subcommand)]
    Config(ConfigAction),
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Write a config file with every default spelled out.
    Init {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Args)]
struct ContainerArgs {
    /// Container file (.ekc).
    #[arg(long, short)]
    file: PathBuf,

    #[arg(long, env = "KFD_PASSWORD", hide_env_values = true)]
    password: String,

    #[command(subcommand)]
    action: ContainerAction,
}

#[derive(Debug, Subcommand)]
enum ContainerAction {
    /// Create an empty container.
    New,
    /// Print keys and groups (key material is never printed).
    List,
    AddKey {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        slot: KeySlotArgs,
        /// Key material as hex.
        #[arg(long)]
        key: String,
        /// Accept keys that only raise warnings.
        #[arg(long)]
        force: bool,
    },
    RemoveKey {
        #[arg(long)]
        id: u32,
    },
    AddGroup {
        #[arg(long)]
        name: String,
        /// Member key ids, comma separated.
        #[arg(long, value_delimiter = ',')]
        keys: Vec<u32>,
    },
    RemoveGroup {
        #[arg(long)]
        id: u32,
    },
}

/// Where a key goes in the radio.
#[derive(Debug, Clone, Args)]
struct KeySlotArgs {
    /// Load into the radio's active keyset instead of `--keyset`.
    #[arg(long)]
    active: bool,
    #[arg(long, default_value_t = 1)]
    keyset: u32,
    /// Storage location number / common key reference.
    #[arg(long)]
    sln: u32,
    /// `auto`, `kek` or `tek`.  `auto` picks KEK for SLNs in crypto group 15.
    #[arg(long, default_value = "auto", value_parser = parse_key_type)]
    key_type: KeyType,
    #[arg(long)]
    key_id: u32,
    /// Algorithm id, decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_number)]
    alg: u32,
}

#[derive(Debug, Args)]
struct RadioArgs {
    #[command(flatten)]
    link: LinkArgs,

    #[command(subcommand)]
    action: RadioAction,
}

#[derive(Debug, Args)]
struct LinkArgs {
    /// KFD adapter exposed on a TCP port (host:port).
    #[arg(long, conflicts_with = "relay")]
    tcp: Option<String>,

    /// Adapter model, selecting the byte framing (`kfdtool-avr` or `kfd-micro`).
    #[arg(long, value_parser = parse_adapter)]
    adapter: Option<AdapterModel>,

    /// Network relay URL; falls back to the config file.
    #[arg(long, env = "KFD_RELAY_URL")]
    relay: Option<String>,

    /// Radio address behind the relay.
    #[arg(long, env = "KFD_TARGET_IP")]
    target_ip: Option<String>,

    /// Use the Motorola DLI handshake.
    #[arg(long)]
    motorola: bool,
}

#[derive(Debug, Subcommand)]
enum RadioAction {
    /// Open and close a session without payload.
    Check,
    /// List every key in the radio.
    ViewKeys,
    /// List the active keyset ids.
    ViewKeysets,
    LoadKey {
        #[command(flatten)]
        slot: KeySlotArgs,
        /// Key material as hex.
        #[arg(long)]
        key: String,
        /// Load keys that only raise warnings.
        #[arg(long)]
        force: bool,
    },
    /// Load every key of a container group.
    LoadGroup {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, env = "KFD_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        group: u32,
        /// Load keys that only raise warnings.
        #[arg(long)]
        force: bool,
    },
    EraseKey {
        #[command(flatten)]
        slot: KeySlotArgs,
        /// Key length in bytes, when the algorithm does not fix one.
        #[arg(long)]
        key_len: Option<usize>,
    },
    /// Zeroize every key in the radio.
    EraseAll,
    ViewTagging,
    /// Activate a keyset, superseding another.
    Activate {
        #[arg(long)]
        superseded: u8,
        #[arg(long)]
        activated: u8,
    },
    ViewRsi,
    ChangeRsi {
        #[arg(long, value_parser = parse_rsi)]
        old: Rsi,
        #[arg(long, value_parser = parse_rsi)]
        new: Rsi,
        /// Message number.
        #[arg(long, default_value_t = 0)]
        mn: u16,
    },
    ViewKmfRsi,
    ViewMnp,
    LoadConfig {
        #[arg(long, value_parser = parse_rsi)]
        kmf_rsi: Rsi,
        #[arg(long)]
        mnp: u16,
    },
    Capabilities,
}

// ── Value parsers ─────────────────────────────────────────────────────────────

fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{s}' is not a number: {e}"))
}

fn parse_rsi(s: &str) -> Result<Rsi, String> {
    Rsi::new(parse_number(s)?).map_err(|e| e.to_string())
}

fn parse_key_type(s: &str) -> Result<KeyType, String> {
    match s {
        "auto" => Ok(KeyType::Auto),
        "kek" => Ok(KeyType::Kek),
        "tek" => Ok(KeyType::Tek),
        other => Err(format!("unknown key type '{other}' (auto, kek, tek)")),
    }
}

fn parse_adapter(s: &str) -> Result<AdapterModel, String> {
    match s {
        "kfdtool-avr" => Ok(AdapterModel::KfdToolAvr),
        "kfd-micro" => Ok(AdapterModel::KfdMicro),
        other => Err(format!("unknown adapter '{other}' (kfdtool-avr, kfd-micro)")),
    }
}

impl KeySlotArgs {
    fn is_kek(&self) -> bool {
        match self.key_type {
            KeyType::Auto => self.sln >= 0xF000,
            KeyType::Kek => true,
            KeyType::Tek => false,
        }
    }

    fn to_cmd_key_item(&self, key: Vec<u8>) -> anyhow::Result<CmdKeyItem> {
        CmdKeyItem::new(
            self.active,
            self.keyset,
            self.sln,
            self.is_kek(),
            self.key_id,
            self.alg,
            key,
        )
        .context("invalid key slot")
    }

    fn to_entry(&self, name: String, key: Vec<u8>) -> anyhow::Result<KeyEntry> {
        Ok(KeyEntry {
            name,
            use_active_keyset: self.active,
            keyset_id: u8::try_from(self.keyset).context("keyset out of range")?,
            sln_ckr: u16::try_from(self.sln).context("SLN out of range")?,
            key_type: self.key_type,
            key_id: u16::try_from(self.key_id).context("key id out of range")?,
            algorithm_id: u8::try_from(self.alg).context("algorithm id out of range")?,
            key,
        })
    }
}

fn decode_key(hex_key: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(hex_key.trim()).context("key is not valid hex")
}

/// Builds a load request and runs the key validation rules over it.
fn load_item(slot: &KeySlotArgs, hex_key: &str, force: bool) -> anyhow::Result<CmdKeyItem> {
    let item = slot.to_cmd_key_item(decode_key(hex_key)?)?;
    check_load_item(&item, force).context("key refused (warnings can be overridden with --force)")?;
    Ok(item)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("failed to load config")?;

    let default_filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.host.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Container(args) => run_container(args),
        Command::Radio(args) => run_radio(args, &config).await,
        Command::Config(action) => run_config(action, cli.config, &config),
    }
}

// ── Config commands ───────────────────────────────────────────────────────────

fn run_config(action: ConfigAction, path: Option<PathBuf>, config: &HostConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match path {
                Some(p) => p,
                None => config_file_path()?,
            };
            if path.exists() && !force {
                bail!("{} already exists; pass --force to replace it", path.display());
            }
            save_config(&HostConfig::default(), &path)
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        ConfigAction::Show => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

// ── Container commands ────────────────────────────────────────────────────────

fn run_container(args: ContainerArgs) -> anyhow::Result<()> {
    let path = &args.file;
    let mut service = match args.action {
        ContainerAction::New => ContainerService::create(path, &args.password)
            .with_context(|| format!("cannot create {}", path.display()))?,
        _ => ContainerService::open(path, &args.password)
            .with_context(|| format!("cannot open {}", path.display()))?,
    };

    match args.action {
        ContainerAction::New => {
            println!("created {}", path.display());
            return Ok(());
        }
        ContainerAction::List => {
            for key in service.container().keys() {
                println!(
                    "key {:>4}  {:<24} keyset {:<3} sln {:<5} kid {:<5} {} {}",
                    key.id,
                    key.name,
                    if key.use_active_keyset {
                        "act".to_string()
                    } else {
                        key.keyset_id.to_string()
                    },
                    key.sln_ckr,
                    key.key_id,
                    algorithm_name(key.algorithm_id),
                    if key.is_kek() { "KEK" } else { "TEK" },
                );
            }
            for group in service.container().groups() {
                println!("group {:>4}  {:<24} keys {:?}", group.id, group.name, group.key_ids);
            }
            return Ok(());
        }
        ContainerAction::AddKey {
            name,
            slot,
            key,
            force,
        } => {
            let entry = slot.to_entry(name, decode_key(&key)?)?;
            let id = service.add_key(entry, force)?;
            println!("added key {id}");
        }
        ContainerAction::RemoveKey { id } => {
            let removed = service.remove_key(id)?;
            println!("removed key {} ({})", removed.id, removed.name);
        }
        ContainerAction::AddGroup { name, keys } => {
            let id = service.add_group(&name, keys)?;
            println!("added group {id}");
        }
        ContainerAction::RemoveGroup { id } => {
            let removed = service.remove_group(id)?;
            println!("removed group {} ({})", removed.id, removed.name);
        }
    }

    service
        .save()
        .with_context(|| format!("cannot save {}", path.display()))?;
    Ok(())
}

// ── Radio commands ────────────────────────────────────────────────────────────

async fn connect(link: &LinkArgs, config: &HostConfig) -> anyhow::Result<Arc<dyn SessionProtocol>> {
    let read_policy = config.timing.read_policy();

    if let Some(addr) = &link.tcp {
        let model = link.adapter.unwrap_or(config.adapter.model);
        let transport = StreamTransport::connect_tcp(addr, model.frame_scheme(), read_policy)
            .await
            .with_context(|| format!("cannot reach adapter at {addr}"))?;
        return Ok(Arc::new(ThreeWireProtocol::new(Arc::new(transport))));
    }

    let Some(url) = link.relay.clone().or_else(|| config.relay.url.clone()) else {
        bail!("no link given: use --tcp HOST:PORT or --relay URL");
    };
    let Some(target_ip) = link.target_ip.clone().or_else(|| config.relay.target_ip.clone()) else {
        bail!("relay link needs --target-ip");
    };
    let variant = if link.motorola || config.relay.motorola {
        DliVariant::Motorola
    } else {
        DliVariant::Standard
    };
    let transport = RelayTransport::connect(&url, target_ip, read_policy)
        .await
        .with_context(|| format!("cannot reach relay at {url}"))?;
    Ok(Arc::new(DliProtocol::new(
        Arc::new(transport),
        variant,
        config.timing.dli_step_delay(),
    )))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_statuses(statuses: &[kfd_core::KeyStatus]) -> anyhow::Result<()> {
    print_json(&statuses)?;
    let failed = statuses.iter().filter(|s| !s.is_success()).count();
    if failed > 0 {
        for status in statuses.iter().filter(|s| !s.is_success()) {
            eprintln!(
                "key {} ({}): {}",
                status.key_id,
                algorithm_name(status.algorithm_id),
                OperationStatus::from_code(status.status)
            );
        }
        bail!("{failed} of {} key(s) were refused", statuses.len());
    }
    Ok(())
}

async fn run_radio(args: RadioArgs, config: &HostConfig) -> anyhow::Result<()> {
    // Container files are read before the radio link is opened.
    let group_items = match &args.action {
        RadioAction::LoadGroup {
            file,
            password,
            group,
            force,
        } => {
            let service = ContainerService::open(file, password)
                .with_context(|| format!("cannot open {}", file.display()))?;
            let items = service.group_items(*group)?;
            for item in &items {
                check_load_item(item, *force).with_context(|| {
                    format!("key {} refused (warnings can be overridden with --force)", item.key_id())
                })?;
            }
            Some(items)
        }
        _ => None,
    };

    let protocol = connect(&args.link, config).await?;
    let app = ManualRekeyApplication::new(protocol, config.timing.recovery_policy());

    match args.action {
        RadioAction::Check => {
            app.check_connection().await?;
            println!("radio responded");
        }
        RadioAction::ViewKeys => print_json(&app.view_key_info().await?)?,
        RadioAction::ViewKeysets => print_json(&app.view_active_keyset_ids().await?)?,
        RadioAction::LoadKey { slot, key, force } => {
            let item = load_item(&slot, &key, force)?;
            let status = app.load_keys_single(item).await?;
            report_statuses(&[status])?;
        }
        RadioAction::LoadGroup { .. } => {
            let items = group_items.unwrap_or_default();
            info!(count = items.len(), "loading key group");
            report_statuses(&app.load_keys_batch(&items).await?)?;
        }
        RadioAction::EraseKey { slot, key_len } => {
            let len = key_len
                .or_else(|| {
                    u8::try_from(slot.alg)
                        .ok()
                        .and_then(AlgorithmId::from_u8)
                        .and_then(AlgorithmId::key_length)
                })
                .context("algorithm has no fixed key length; pass --key-len")?;
            let item = slot.to_cmd_key_item(vec![0; len])?;
            report_statuses(&app.erase_keys(&[item]).await?)?;
        }
        RadioAction::EraseAll => {
            app.erase_all_keys().await?;
            println!("all keys zeroized");
        }
        RadioAction::ViewTagging => print_json(&app.view_keyset_tagging_info().await?)?,
        RadioAction::Activate {
            superseded,
            activated,
        } => print_json(&app.activate_keyset(superseded, activated).await?)?,
        RadioAction::ViewRsi => print_json(&app.view_rsi_items().await?)?,
        RadioAction::ChangeRsi { old, new, mn } => {
            let response = app.change_rsi(old, new, mn).await?;
            println!("RSI changed from {} to {}", response.rsi_old, response.rsi_new);
        }
        RadioAction::ViewKmfRsi => println!("{}", app.view_kmf_rsi().await?),
        RadioAction::ViewMnp => println!("{}", app.view_mnp().await?),
        RadioAction::LoadConfig { kmf_rsi, mnp } => {
            let response = app.load_config(kmf_rsi, mnp).await?;
            println!("KMF RSI {} MNP {}", response.kmf_rsi, response.mnp);
        }
        RadioAction::Capabilities => print_json(&app.view_capabilities().await?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_number_accepts_hex_and_decimal() {
        assert_eq!(parse_number("0x84"), Ok(0x84));
        assert_eq!(parse_number("132"), Ok(132));
        assert!(parse_number("zz").is_err());
    }

    #[test]
    fn test_radio_load_key_arguments_parse() {
        // Arrange / Act
        let cli = Cli::try_parse_from([
            "kfd", "radio", "--tcp", "127.0.0.1:5000", "load-key", "--active", "--sln", "100",
            "--key-id", "1", "--alg", "0x84", "--key", "00",
        ])
        .unwrap();

        // Assert
        let Command::Radio(args) = cli.command else {
            panic!("expected radio command");
        };
        let RadioAction::LoadKey { slot, .. } = args.action else {
            panic!("expected load-key");
        };
        assert!(slot.active);
        assert_eq!(slot.alg, 0x84);
        assert!(!slot.is_kek());
    }

    fn slot(alg: u32) -> KeySlotArgs {
        KeySlotArgs {
            active: false,
            keyset: 1,
            sln: 100,
            key_type: KeyType::Auto,
            key_id: 1,
            alg,
        }
    }

    #[test]
    fn test_clear_algorithm_load_is_refused() {
        let result = load_item(&slot(0x80), "0011223344556677", true);

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("clear"), "got: {err:#}");
    }

    #[test]
    fn test_guessable_key_loads_only_with_force() {
        // Arrange
        let zero_key = "00".repeat(32);

        // Act
        let refused = load_item(&slot(0x84), &zero_key, false);
        let forced = load_item(&slot(0x84), &zero_key, true);

        // Assert
        assert!(refused.is_err());
        assert_eq!(forced.unwrap().algorithm_id(), 0x84);
    }

    #[test]
    fn test_load_key_force_flag_parses() {
        let cli = Cli::try_parse_from([
            "kfd", "radio", "load-key", "--sln", "100", "--key-id", "1", "--alg", "0x84", "--key",
            "00", "--force",
        ])
        .unwrap();

        let Command::Radio(RadioArgs {
            action: RadioAction::LoadKey { force, .. },
            ..
        }) = cli.command
        else {
            panic!("expected load-key");
        };
        assert!(force);
    }

    #[test]
    fn test_config_init_writes_default_file_once() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("kfd_test_{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");
        let config = HostConfig::default();

        // Act
        let first = run_config(ConfigAction::Init { force: false }, Some(path.clone()), &config);
        let second = run_config(ConfigAction::Init { force: false }, Some(path.clone()), &config);
        let forced = run_config(ConfigAction::Init { force: true }, Some(path.clone()), &config);

        // Assert
        assert!(first.is_ok());
        assert!(second.is_err(), "existing file is not overwritten without --force");
        assert!(forced.is_ok());
        assert_eq!(load_config(Some(&path)).unwrap(), HostConfig::default());

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sln_in_crypto_group_15_is_kek_by_default() {
        let cli = Cli::try_parse_from([
            "kfd", "radio", "erase-key", "--sln", "61441", "--key-id", "1", "--alg", "0x84",
        ])
        .unwrap();
        let Command::Radio(RadioArgs {
            action: RadioAction::EraseKey { slot, .. },
            ..
        }) = cli.command
        else {
            panic!("expected erase-key");
        };
        assert!(slot.is_kek());
    }
}
