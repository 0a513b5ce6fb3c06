// A `Table` plus the file it was last saved to or loaded from.
//
// Saving never writes the destination in place: the encoded table goes to
// `<name>.tmp`, is synced, and is then renamed over `<name>`. A crash
// mid-save leaves the previous file intact.

use std::{
    fmt,
    io::{self, BufReader},
    path::PathBuf,
};

use tracing::debug;

use crate::{
    codec,
    config::StoreConfig,
    error::{Error, Result},
    fs::{DbDir, DbFile, OsDir},
    table::{self, Table},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub entries: usize,
    pub capacity: usize,
    pub tombstones: usize,
    pub load_factor: f64,
    pub filename: Option<String>,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Key-Value Store Statistics:")?;
        writeln!(f, "  Entries: {}", self.entries)?;
        writeln!(f, "  Capacity: {}", self.capacity)?;
        writeln!(f, "  Tombstones: {}", self.tombstones)?;
        writeln!(f, "  Load Factor: {:.2}%", self.load_factor * 100.0)?;
        match &self.filename {
            Some(name) => write!(f, "  Associated file: {}", name),
            None => write!(f, "  Associated file: None"),
        }
    }
}

#[derive(Debug)]
pub struct Store<D>
where
    D: DbDir,
{
    dir: D,
    table: Table,
    filename: Option<String>,
    config: StoreConfig,
}

impl Store<OsDir> {
    /// Opens a store whose files live under `dir`.
    pub fn open_dir<P>(dir: P, config: StoreConfig) -> Self
    where
        P: Into<PathBuf>,
    {
        let dir = OsDir::new(dir);
        debug!(dir = %dir.root().display(), "opening store");
        Self::new(dir, config)
    }
}

fn tmp_name(name: &str) -> String {
    format!("{}.tmp", name)
}

fn check_filename(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(Error::InvalidParameter("filename is empty".into()))
    } else {
        Ok(())
    }
}

impl<D> Store<D>
where
    D: DbDir,
{
    pub fn new(dir: D, config: StoreConfig) -> Self {
        Store {
            dir,
            table: Table::with_capacity(config.initial_capacity),
            filename: None,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn set(&mut self, key: i32, value: &str) -> Result<()> {
        self.table.set(key, value)
    }

    pub fn get(&self, key: i32) -> Result<Option<&str>> {
        self.table.get(key)
    }

    pub fn delete(&mut self, key: i32) -> Result<String> {
        self.table.delete(key)
    }

    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn entries(&self) -> table::Iter<'_> {
        self.table.iter()
    }

    /// The file most recently saved to or loaded from.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Replaces the table with an empty one, returning how many entries were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.table.len();
        self.table = Table::with_capacity(self.config.initial_capacity);
        debug!(dropped, "cleared store");
        dropped
    }

    pub fn exists(&mut self, name: &str) -> bool {
        self.dir.open(&name).is_some()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            entries: self.table.len(),
            capacity: self.table.capacity(),
            tombstones: self.table.tombstones(),
            load_factor: self.table.load_factor(),
            filename: self.filename.clone(),
        }
    }

    /// Writes the whole table to `name`, replacing any previous contents.
    /// Returns the number of entries written.
    pub fn save(&mut self, name: &str) -> Result<usize> {
        check_filename(name)?;
        let bytes = codec::to_bytes(&self.table)?;
        let tmp = tmp_name(name);

        // Left behind by an earlier save that did not finish.
        self.dir.unlink(&tmp)?;
        let mut file = self
            .dir
            .create(&tmp)?
            .ok_or_else(|| anyhow::anyhow!("{} was created concurrently", tmp))?;
        file.write(&bytes)?;
        file.sync()?;
        self.dir.rename(&tmp, &name)?;

        debug!(file = name, entries = self.table.len(), bytes = bytes.len(), "saved store");
        self.filename = Some(name.to_owned());
        Ok(self.table.len())
    }

    /// Merges the contents of `name` into the table. Returns the number of
    /// records read from the file.
    pub fn load(&mut self, name: &str) -> Result<usize> {
        check_filename(name)?;
        let file = self.dir.open(&name).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", name),
            ))
        })?;

        let loaded = codec::deserialize(BufReader::new(file), &mut self.table)?;

        debug!(file = name, loaded, "loaded store");
        self.filename = Some(name.to_owned());
        Ok(loaded)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        config::StoreConfig,
        error::{status_message, ErrorKind},
        fs::{DbDir, DbFile, MockDir},
    };

    use super::Store;

    #[test]
    fn test_save_load_os() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;

        let mut store = Store::open_dir(tmp.path(), StoreConfig::default());
        store.set(100, "one hundred")?;
        store.set(200, "two hundred")?;
        store.set(300, "three hundred")?;
        assert_eq!(store.save("data.bin")?, 3);
        assert_eq!(store.filename(), Some("data.bin"));
        assert!(tmp.path().join("data.bin").is_file());
        assert!(!tmp.path().join("data.bin.tmp").exists());

        let mut reopened = Store::open_dir(tmp.path(), StoreConfig::default());
        assert!(reopened.exists("data.bin"));
        assert_eq!(reopened.filename(), None);
        assert_eq!(reopened.load("data.bin")?, 3);
        assert_eq!(reopened.count(), 3);
        assert_eq!(reopened.get(200)?, Some("two hundred"));
        assert_eq!(reopened.filename(), Some("data.bin"));

        Ok(())
    }

    #[test]
    fn test_overwrite_existing_file() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut store = Store::open_dir(tmp.path(), StoreConfig::default());
        store.set(1, "one")?;
        store.set(2, "two")?;
        store.save("data.bin")?;

        store.delete(2)?;
        store.save("data.bin")?;

        let mut reopened = Store::open_dir(tmp.path(), StoreConfig::default());
        reopened.load("data.bin")?;
        assert_eq!(reopened.count(), 1);
        assert_eq!(reopened.get(2)?, None);
        Ok(())
    }

    #[test]
    fn test_load_missing() {
        let mut store = Store::new(MockDir::new(), StoreConfig::default());
        let result = store.load("missing.bin");
        assert_eq!(result.as_ref().unwrap_err().kind(), ErrorKind::FileIo);
        assert_eq!(status_message(&result), "File I/O error");
        assert_eq!(store.filename(), None);
    }

    #[test]
    fn test_empty_filename() {
        let mut store = Store::new(MockDir::new(), StoreConfig::default());
        assert_eq!(store.save("").unwrap_err().kind(), ErrorKind::InvalidParameter);
        assert_eq!(store.load("  ").unwrap_err().kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_load_corrupt() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut f = dir.create(&"junk.bin")?.unwrap();
        f.write(b"this is not a kvs file")?;

        let mut store = Store::new(dir, StoreConfig::default());
        store.set(1, "one")?;
        let err = store.load("junk.bin").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert_eq!(store.count(), 1);
        assert_eq!(store.filename(), None);
        Ok(())
    }

    #[test]
    fn test_crash_during_save_keeps_previous_file() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut store = Store::new(dir.clone(), StoreConfig::default());
        store.set(1, "one")?;
        store.save("data.bin")?;

        store.set(2, "two")?;
        // unlink, create and write succeed; the sync fails.
        (*dir.fs).borrow_mut().schedule_crash(3);
        let err = store.save("data.bin").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileIo);
        (*dir.fs).borrow_mut().reboot();

        let mut recovered = Store::new(dir, StoreConfig::default());
        assert_eq!(recovered.load("data.bin")?, 1);
        assert_eq!(recovered.get(1)?, Some("one"));
        assert_eq!(recovered.get(2)?, None);

        // The stale temporary file does not get in the way of the next save.
        recovered.set(3, "three")?;
        recovered.save("data.bin")?;
        Ok(())
    }

    #[test]
    fn test_clear() -> anyhow::Result<()> {
        let config = StoreConfig {
            initial_capacity: 4,
            ..StoreConfig::default()
        };
        let mut store = Store::new(MockDir::new(), config);
        for k in 0..10 {
            store.set(k, "v")?;
        }
        assert!(store.capacity() > 4);
        assert_eq!(store.clear(), 10);
        assert_eq!(store.count(), 0);
        assert_eq!(store.capacity(), 4);
        Ok(())
    }

    #[test]
    fn test_stats_display() -> anyhow::Result<()> {
        let mut store = Store::new(MockDir::new(), StoreConfig::default());
        store.set(1, "one")?;
        store.set(2, "two")?;
        store.set(3, "three")?;
        store.delete(3)?;

        let stats = store.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(
            stats.to_string(),
            "Key-Value Store Statistics:\n  Entries: 2\n  Capacity: 16\n  Tombstones: 1\n  \
             Load Factor: 18.75%\n  Associated file: None"
        );
        Ok(())
    }

    #[test]
    fn test_store_trace() {
        datadriven::walk("src/store/testdata/", |f| {
            let dir = MockDir::new();
            let mut store = Store::new(dir.clone(), StoreConfig::default());
            f.run(|test_case| match test_case.directive.as_str() {
                "set" => {
                    for line in test_case.input.lines() {
                        let eq_idx = line.find('=').unwrap();
                        let key: i32 = line[0..eq_idx].parse().unwrap();
                        store.set(key, &line[eq_idx + 1..]).unwrap();
                    }
                    "ok\n".into()
                }
                "get" => {
                    let key: i32 = test_case.input.trim().parse().unwrap();
                    format!("{:?}\n", store.get(key))
                }
                "save" => {
                    let name = test_case.input.trim();
                    match store.save(name) {
                        Ok(n) => format!("saved {}\n", n),
                        Err(e) => format!("error: {}\n", e.kind()),
                    }
                }
                "load" => {
                    let name = test_case.input.trim();
                    match store.load(name) {
                        Ok(n) => format!("loaded {}\n", n),
                        Err(e) => format!("error: {}\n", e.kind()),
                    }
                }
                "crash" => {
                    let ops = test_case.args.get("after").unwrap()[0].parse().unwrap();
                    (*dir.fs).borrow_mut().schedule_crash(ops);
                    "ok\n".into()
                }
                "reboot" => {
                    (*dir.fs).borrow_mut().reboot();
                    store = Store::new(dir.clone(), StoreConfig::default());
                    "ok\n".into()
                }
                "trace" => {
                    let mut result = String::new();
                    for event in (*dir.fs).borrow_mut().take_events() {
                        event.write_abbrev(&mut result).unwrap();
                        result.push('\n');
                    }
                    if test_case.args.contains_key("squelch") {
                        "ok\n".into()
                    } else {
                        result
                    }
                }
                _ => {
                    panic!("unhandled");
                }
            })
        })
    }
}
