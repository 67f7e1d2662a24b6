use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::STORE_VERSION;
use crate::error::{AppError, AppResult};
use crate::pool::account::Account;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountStore {
    pub version: String,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountExport {
    pub version: String,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    pub accounts: Vec<Account>,
}

pub fn load(path: &Path) -> AppResult<Vec<Account>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let store: AccountStore = serde_json::from_str(&content)
        .map_err(|e| AppError::Config(format!("failed to parse {:?}: {}", path, e)))?;
    Ok(store.accounts)
}

// Atomic write: serialize to a sibling temp file, then rename over the target.
pub fn write_atomic(path: &Path, accounts: &[Account]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = AccountStore {
        version: STORE_VERSION.to_string(),
        accounts: accounts.to_vec(),
    };
    let json = serde_json::to_string_pretty(&store)
        .map_err(|e| AppError::Internal(format!("failed to serialize account store: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn export(accounts: &[Account]) -> AccountExport {
    AccountExport {
        version: STORE_VERSION.to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        accounts: accounts.to_vec(),
    }
}
