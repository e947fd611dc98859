//! Per-client session state.
//!
//! One session per TCP connection, owned by that connection's task and
//! never shared. Tracks the selected database, user-defined variables, and
//! shadows of the MySQL session system variables that clients read back —
//! none of which are ever forwarded to the backend.

use std::collections::HashMap;

use kestrel_common::row::ScalarValue;
use kestrel_sql_frontend::eval::VarSource;

/// Version banner advertised to clients.
pub const SERVER_VERSION: &str = "8.0.33-kestrel-proxy";

pub struct ProxySession {
    pub connection_id: u32,
    pub user: String,
    pub current_database: Option<String>,
    /// `@name` variables.
    user_vars: HashMap<String, ScalarValue>,
    /// Shadowed `@@name` variables, keys lowercased.
    system_vars: HashMap<String, ScalarValue>,
}

/// MySQL-flavored defaults clients expect to read back at connect time.
fn default_system_vars() -> HashMap<String, ScalarValue> {
    let mut vars = HashMap::new();
    let mut text = |k: &str, v: &str| {
        vars.insert(k.to_string(), ScalarValue::Text(v.to_string()));
    };
    text("version_comment", "KestrelProxy");
    text("character_set_client", "utf8mb4");
    text("character_set_connection", "utf8mb4");
    text("character_set_results", "utf8mb4");
    text("character_set_server", "utf8mb4");
    text("collation_connection", "utf8mb4_general_ci");
    text("collation_server", "utf8mb4_general_ci");
    text("tx_isolation", "REPEATABLE-READ");
    text("transaction_isolation", "REPEATABLE-READ");
    text("sql_mode", "");
    text("time_zone", "SYSTEM");
    text("system_time_zone", "UTC");
    vars.insert("autocommit".into(), ScalarValue::Int(1));
    vars.insert("tx_read_only".into(), ScalarValue::Int(0));
    vars.insert("transaction_read_only".into(), ScalarValue::Int(0));
    vars.insert("max_allowed_packet".into(), ScalarValue::Int(67_108_864));
    vars.insert("wait_timeout".into(), ScalarValue::Int(28_800));
    vars.insert("interactive_timeout".into(), ScalarValue::Int(28_800));
    vars.insert("net_write_timeout".into(), ScalarValue::Int(60));
    vars.insert("net_buffer_length".into(), ScalarValue::Int(16_384));
    vars.insert("lower_case_table_names".into(), ScalarValue::Int(0));
    vars.insert("auto_increment_increment".into(), ScalarValue::Int(1));
    vars
}

impl ProxySession {
    pub fn new(connection_id: u32) -> Self {
        Self {
            connection_id,
            user: String::new(),
            current_database: None,
            user_vars: HashMap::new(),
            system_vars: default_system_vars(),
        }
    }

    /// Set a shadow system variable. Name is normalized to lowercase.
    pub fn set_system_var(&mut self, name: &str, value: ScalarValue) {
        self.system_vars.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get_system_var(&self, name: &str) -> Option<&ScalarValue> {
        self.system_vars.get(&name.to_ascii_lowercase())
    }

    pub fn set_user_var(&mut self, name: &str, value: ScalarValue) {
        self.user_vars.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get_user_var(&self, name: &str) -> Option<&ScalarValue> {
        self.user_vars.get(&name.to_ascii_lowercase())
    }

    /// Apply `SET NAMES <cs> [COLLATE <col>]`.
    pub fn set_names(&mut self, charset: &str, collation: Option<&str>) {
        self.set_system_var("character_set_client", ScalarValue::Text(charset.into()));
        self.set_system_var("character_set_connection", ScalarValue::Text(charset.into()));
        self.set_system_var("character_set_results", ScalarValue::Text(charset.into()));
        if let Some(collation) = collation {
            self.set_system_var("collation_connection", ScalarValue::Text(collation.into()));
        }
    }

    /// Apply `SET CHARACTER SET <cs>`: client and results take the charset,
    /// the connection charset follows the database charset.
    pub fn set_character_set(&mut self, charset: &str) {
        self.set_system_var("character_set_client", ScalarValue::Text(charset.into()));
        self.set_system_var("character_set_results", ScalarValue::Text(charset.into()));
        let server_charset = self
            .get_system_var("character_set_server")
            .cloned()
            .unwrap_or_else(|| ScalarValue::Text("utf8mb4".into()));
        self.set_system_var("character_set_connection", server_charset);
    }
}

impl VarSource for ProxySession {
    fn system_var(&self, name: &str) -> Option<ScalarValue> {
        self.get_system_var(name).cloned()
    }

    fn user_var(&self, name: &str) -> Option<ScalarValue> {
        self.get_user_var(name).cloned()
    }

    fn connection_id(&self) -> u64 {
        u64::from(self.connection_id)
    }

    fn current_database(&self) -> Option<String> {
        self.current_database.clone()
    }

    fn server_version(&self) -> String {
        SERVER_VERSION.to_string()
    }

    fn current_user(&self) -> String {
        if self.user.is_empty() {
            "kestrel@%".to_string()
        } else {
            format!("{}@%", self.user)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_present() {
        let session = ProxySession::new(1);
        assert_eq!(
            session.get_system_var("AUTOCOMMIT"),
            Some(&ScalarValue::Int(1))
        );
        assert!(session.get_system_var("version_comment").is_some());
        assert!(session.current_database.is_none());
    }

    #[test]
    fn test_set_names_updates_three_vars_and_collation() {
        let mut session = ProxySession::new(1);
        session.set_names("latin1", Some("latin1_swedish_ci"));
        for var in [
            "character_set_client",
            "character_set_connection",
            "character_set_results",
        ] {
            assert_eq!(
                session.get_system_var(var),
                Some(&ScalarValue::Text("latin1".into())),
                "{var}"
            );
        }
        assert_eq!(
            session.get_system_var("collation_connection"),
            Some(&ScalarValue::Text("latin1_swedish_ci".into()))
        );
    }

    #[test]
    fn test_set_character_set_connection_follows_server() {
        let mut session = ProxySession::new(1);
        session.set_character_set("latin1");
        assert_eq!(
            session.get_system_var("character_set_client"),
            Some(&ScalarValue::Text("latin1".into()))
        );
        assert_eq!(
            session.get_system_var("character_set_connection"),
            Some(&ScalarValue::Text("utf8mb4".into()))
        );
    }

    #[test]
    fn test_user_vars_case_insensitive() {
        let mut session = ProxySession::new(1);
        session.set_user_var("Answer", ScalarValue::Int(42));
        assert_eq!(session.get_user_var("answer"), Some(&ScalarValue::Int(42)));
    }

    #[test]
    fn test_var_source_bridges_session() {
        let mut session = ProxySession::new(7);
        session.current_database = Some("analytics".into());
        assert_eq!(VarSource::connection_id(&session), 7);
        assert_eq!(
            VarSource::current_database(&session),
            Some("analytics".to_string())
        );
    }
}
