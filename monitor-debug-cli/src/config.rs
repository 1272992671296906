use std::path::Path;

use figment::providers::{Env, Format as _, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::logging::LevelFilter;

/// Prefix of environment variables overriding the configuration file.
const ENV_PREFIX: &str = "MONITOR_DEBUG_";

/// Configuration file looked for in the working directory when none is given.
const DEFAULT_CONFIG_FILE: &str = "monitor-debug.toml";

/// Thumb `BX LR`.
const BX_LR: u16 = monitor_debug::sim::BX_LR;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log level used when `--log-level` is not given.
    pub log_level: Option<LevelFilter>,
    /// Set DHCSR.C_DEBUGEN at boot, as if a debugger was attached.
    pub halting_debug: bool,
    /// Enable monitor mode before the shell starts.
    pub monitor_on_boot: bool,
    /// Shape of the simulated Flash Patch and Breakpoint unit.
    pub fpb: FpbSettings,
    /// Functions loaded into code memory, callable with the `call` command.
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FpbSettings {
    /// FP_CTRL.REV, only revision 0 matches breakpoints.
    pub revision: u8,
    /// Number of instruction address comparators.
    pub code_comparators: u8,
    /// Number of literal address comparators.
    pub literal_comparators: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Function {
    /// Name accepted by `call`.
    pub name: String,
    /// Address of the first half-word.
    pub address: u32,
    /// Thumb half-words, ending with `BX LR`.
    pub instructions: Vec<u16>,
}

impl Default for FpbSettings {
    fn default() -> Self {
        Self {
            revision: 0,
            code_comparators: 6,
            literal_comparators: 2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // Nine small functions in flash, 8 bytes apart so both half-word slots of a
        // comparator get used, and one in RAM where only BKPT works.
        let mut functions: Vec<Function> = (1..=9u16)
            .map(|n| Function {
                name: format!("dummy_function_{n}"),
                address: 0x0800_0190 + 8 * n as u32,
                // movs r0, #n; adds r0, #1; bx lr
                instructions: vec![0x2000 | n, 0x3001, BX_LR],
            })
            .collect();

        functions.push(Function {
            name: "dummy_function_ram".to_string(),
            address: 0x2000_0100,
            // movs r0, #0; nop; bx lr
            instructions: vec![0x2000, 0xBF00, BX_LR],
        });

        Self {
            log_level: None,
            halting_debug: false,
            monitor_on_boot: true,
            fpb: FpbSettings::default(),
            functions,
        }
    }
}

/// Merge the defaults, the configuration file and the environment.
///
/// A missing file is only an error if it was given explicitly.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    match path {
        Some(path) => {
            anyhow::ensure!(
                path.exists(),
                "Configuration file {} does not exist",
                path.display()
            );
            figment = figment.merge(Toml::file(path));
        }
        None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
    }

    let config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract::<Config>()?;

    tracing::debug!("Loaded {:?}", config);

    Ok(config)
}
