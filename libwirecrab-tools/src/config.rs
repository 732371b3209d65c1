use std::io;

use crate::error::Error;

/// Configuration, stored as a TOML document
///
/// Entries are addressed by path: `"capture.backend"` is the `backend` key of the
/// `[capture]` table.
#[derive(Clone, Debug)]
pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn lookup<T: AsRef<str>>(&self, k: T) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k)?.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k)?
            .as_integer()
            .and_then(|i| if i >= 0 { Some(i as usize) } else { None })
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k)?.as_bool()
    }

    /// Set an entry by path, creating intermediate tables when needed.
    ///
    /// An intermediate key holding a non-table value is replaced by a table.
    pub fn set<T: AsRef<str>, V: Into<toml::Value>>(&mut self, k: T, v: V) {
        let keys: Vec<&str> = k.as_ref().split('.').collect();
        let (last, parents) = match keys.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut item = &mut self.value;
        for key in parents {
            if !item.is_table() {
                *item = toml::Value::Table(toml::map::Map::new());
            }
            item = match item {
                toml::Value::Table(table) => table
                    .entry(key.to_string())
                    .or_insert_with(|| toml::Value::Table(toml::map::Map::new())),
                _ => return,
            };
        }
        if !item.is_table() {
            *item = toml::Value::Table(toml::map::Map::new());
        }
        if let toml::Value::Table(table) = item {
            table.insert(last.to_string(), v.into());
        }
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        let table: toml::Table = toml::from_str(&s).map_err(|e| Error::Config(e.to_string()))?;
        debug!("configuration loaded ({} top-level keys)", table.len());
        self.value = toml::Value::Table(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn config_nested_get() {
        let mut config = Config::default();
        let input = "[capture]\nbackend = \"pdml\"\nsnaplen = 128\npromisc = true\n";
        config.load_config(input.as_bytes()).expect("load");
        assert_eq!(config.get("capture.backend"), Some("pdml"));
        assert_eq!(config.get_usize("capture.snaplen"), Some(128));
        assert_eq!(config.get_bool("capture.promisc"), Some(true));
        assert_eq!(config.get("capture.missing"), None);
        assert_eq!(config.get_usize("capture.backend"), None);
    }

    #[test]
    fn config_set_overrides() {
        let mut config = Config::default();
        config.set("store.capacity", 42);
        config.set("capture.backend", "fields");
        config.set("capture.backend", "replay");
        assert_eq!(config.get_usize("store.capacity"), Some(42));
        assert_eq!(config.get("capture.backend"), Some("replay"));
    }

    #[test]
    fn config_invalid_document() {
        let mut config = Config::default();
        assert!(config.load_config("[capture\n".as_bytes()).is_err());
    }
}
