use crate::store::{KvStore, StoreResult};
use std::rc::Rc;

const STATE_PREFIX: &str = "state/";
const DISABLED_FLAG: &str = "disabled";
const SKIP_FLAG: &str = "skip";

/// Prompt commands answered by bumpers itself rather than the rule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Disable,
    Enable,
    Status,
    Skip,
}

impl Builtin {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "disable" => Some(Self::Disable),
            "enable" => Some(Self::Enable),
            "status" => Some(Self::Status),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Per-project flags under `state/<project id>/`.
pub struct ProjectState {
    store: Rc<dyn KvStore>,
    project_id: String,
}

impl ProjectState {
    pub fn new(store: Rc<dyn KvStore>, project_id: impl Into<String>) -> Self {
        Self {
            store,
            project_id: project_id.into(),
        }
    }

    fn key(&self, flag: &str) -> String {
        format!("{STATE_PREFIX}{}/{flag}", self.project_id)
    }

    fn is_set(&self, flag: &str) -> StoreResult<bool> {
        Ok(self.store.get(&self.key(flag))?.is_some())
    }

    fn set(&self, flag: &str, on: bool) -> StoreResult<()> {
        if on {
            self.store.put(&self.key(flag), b"1")
        } else {
            self.store.delete(&self.key(flag))
        }
    }

    pub fn is_disabled(&self) -> StoreResult<bool> {
        self.is_set(DISABLED_FLAG)
    }

    pub fn set_disabled(&self, disabled: bool) -> StoreResult<()> {
        self.set(DISABLED_FLAG, disabled)
    }

    pub fn skip_armed(&self) -> StoreResult<bool> {
        self.is_set(SKIP_FLAG)
    }

    pub fn arm_skip(&self) -> StoreResult<()> {
        self.set(SKIP_FLAG, true)
    }

    /// Consume an armed skip. Returns whether one was armed.
    pub fn take_skip(&self) -> StoreResult<bool> {
        if !self.skip_armed()? {
            return Ok(false);
        }
        self.set(SKIP_FLAG, false)?;
        Ok(true)
    }

    /// Run a built-in and describe the result for the block reason.
    pub fn execute(&self, builtin: Builtin) -> StoreResult<String> {
        let reason = match builtin {
            Builtin::Disable => {
                self.set_disabled(true)?;
                "bumpers disabled for this project. Rules will not fire until re-enabled."
                    .to_string()
            }
            Builtin::Enable => {
                self.set_disabled(false)?;
                "bumpers enabled for this project.".to_string()
            }
            Builtin::Skip => {
                self.arm_skip()?;
                "The next matching tool call will be allowed once.".to_string()
            }
            Builtin::Status => {
                let state = if self.is_disabled()? {
                    "disabled"
                } else {
                    "enabled"
                };
                let skip = if self.skip_armed()? {
                    "a skip is armed"
                } else {
                    "no skip armed"
                };
                format!("bumpers is {state} for this project ({skip}).")
            }
        };
        tracing::info!(?builtin, project = %self.project_id, "ran built-in command");
        Ok(reason)
    }
}
