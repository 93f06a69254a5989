use crate::domain::models::Session;
use crate::infrastructure::error::ScheduleError;
use std::sync::Mutex;

pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<(), ScheduleError>;
    fn load_session(&self) -> Result<Option<Session>, ScheduleError>;
    fn delete_session(&self) -> Result<(), ScheduleError>;
}

#[derive(Debug, Clone)]
pub struct KeyringSessionStore {
    service_name: String,
    account_name: String,
}

impl KeyringSessionStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, ScheduleError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| ScheduleError::Credential(error.to_string()))
    }
}

impl Default for KeyringSessionStore {
    fn default() -> Self {
        Self::new("myschedule.session", "default")
    }
}

impl SessionStore for KeyringSessionStore {
    fn save_session(&self, session: &Session) -> Result<(), ScheduleError> {
        let payload = serde_json::to_string(session)
            .map_err(|error| ScheduleError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| ScheduleError::Credential(error.to_string()))
    }

    fn load_session(&self) -> Result<Option<Session>, ScheduleError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(ScheduleError::Credential(error.to_string())),
        };

        let session = serde_json::from_str::<Session>(&payload)
            .map_err(|error| ScheduleError::Credential(error.to_string()))?;
        Ok(Some(session))
    }

    fn delete_session(&self) -> Result<(), ScheduleError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(ScheduleError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl InMemorySessionStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>, ScheduleError> {
        self.session
            .lock()
            .map_err(|error| ScheduleError::Credential(format!("in-memory lock poisoned: {error}")))
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &Session) -> Result<(), ScheduleError> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<Session>, ScheduleError> {
        Ok(self.lock()?.clone())
    }

    fn delete_session(&self) -> Result<(), ScheduleError> {
        *self.lock()? = None;
        Ok(())
    }
}
