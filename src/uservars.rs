use std::collections::HashMap;

use crate::events::{Event, EventBus};

/// User variables set via OSC 1337 `SetUserVar=`, plus the remote-host and
/// cwd state that together form the "badge session variables".
#[derive(Default)]
pub struct SessionVariables {
    vars: HashMap<String, String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub cwd: Option<String>,
}

impl SessionVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user variable. Emits `user_var_changed` only when the value
    /// actually changes (including the first set for a given key).
    pub fn set(&mut self, key: String, value: String, bus: &mut EventBus) {
        let old_value = self.vars.get(&key).cloned();
        if old_value.as_deref() == Some(value.as_str()) {
            return;
        }
        self.vars.insert(key.clone(), value.clone());
        bus.emit(Event::UserVarChanged {
            key,
            value,
            old_value,
        });
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.vars.get(key)
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// OSC 7: `file://host/path`. Sets cwd and, if the host differs from the
    /// previously recorded hostname, emits a remote-host transition as well.
    pub fn set_cwd_from_osc7(&mut self, host: Option<&str>, path: String, bus: &mut EventBus) {
        self.cwd = Some(path.clone());
        bus.emit(Event::CwdChanged { path });

        if let Some(host) = host {
            if !host.is_empty() && host != "localhost" {
                let old_hostname = self.hostname.clone();
                if old_hostname.as_deref() != Some(host) {
                    self.hostname = Some(host.to_string());
                    bus.emit(Event::RemoteHostTransition {
                        old_hostname,
                        old_username: self.username.clone(),
                        new_hostname: self.hostname.clone(),
                        new_username: self.username.clone(),
                    });
                }
            }
        }
    }

    /// OSC 1337 `RemoteHost=user@host` / `host` / `localhost`.
    pub fn set_remote_host(&mut self, payload: &str, bus: &mut EventBus) {
        if payload.is_empty() {
            return;
        }
        let (user, host) = match payload.split_once('@') {
            Some((u, h)) => (Some(u.to_string()), h.to_string()),
            None => (None, payload.to_string()),
        };

        let old_hostname = self.hostname.clone();
        let old_username = self.username.clone();

        self.username = user.or_else(|| self.username.clone());
        if host == "localhost" {
            self.hostname = None;
        } else {
            self.hostname = Some(host);
        }

        if old_hostname != self.hostname || old_username != self.username {
            bus.emit(Event::RemoteHostTransition {
                old_hostname,
                old_username,
                new_hostname: self.hostname.clone(),
                new_username: self.username.clone(),
            });
        }
    }

    /// Reserved keys (`hostname`, `username`, `cwd`) plus all user variables.
    pub fn badge_session_variables(&self) -> HashMap<String, String> {
        let mut out = self.vars.clone();
        if let Some(h) = &self.hostname {
            out.insert("hostname".to_string(), h.clone());
        }
        if let Some(u) = &self.username {
            out.insert("username".to_string(), u.clone());
        }
        if let Some(c) = &self.cwd {
            out.insert("cwd".to_string(), c.clone());
        }
        out
    }
}
