use std::{
    cell::RefCell,
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

pub trait DbFile: std::fmt::Debug + Read {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()>;
    fn sync(&mut self) -> anyhow::Result<()>;
    fn len(&self) -> anyhow::Result<usize>;
}

pub trait DbDir: Clone + std::fmt::Debug {
    type DbFile: DbFile;

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>;

    // Returns None if the file already exists.
    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>;

    fn open<P>(&mut self, fname: &P) -> Option<Self::DbFile>
    where
        P: AsRef<Path>;

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>;
}

// OS implementation, rooted at a directory.

#[derive(Debug)]
pub struct OsFile {
    file: File,
}

impl Read for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl DbFile for OsFile {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn sync(&mut self) -> anyhow::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> anyhow::Result<usize> {
        Ok(self.file.metadata()?.len().try_into()?)
    }
}

#[derive(Clone, Debug)]
pub struct OsDir {
    root: PathBuf,
}

impl OsDir {
    pub fn new<P>(root: P) -> Self
    where
        P: Into<PathBuf>,
    {
        OsDir { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DbDir for OsDir {
    type DbFile = OsFile;

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>,
    {
        match fs::remove_file(self.root.join(fname)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>,
    {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.root.join(fname))
        {
            Ok(file) => Ok(Some(OsFile { file })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open<P>(&mut self, fname: &P) -> Option<Self::DbFile>
    where
        P: AsRef<Path>,
    {
        let path = self.root.join(fname);
        if !path.is_file() {
            return None;
        }
        File::open(path).ok().map(|file| OsFile { file })
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        // TODO: fsync the directory so the rename itself survives a crash.
        fs::rename(self.root.join(from), self.root.join(to))?;
        Ok(())
    }
}

// Mock Implementation
#[derive(Default, Debug)]
struct MockData {
    synced: Vec<u8>,
    unsynced: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MockFile {
    idx: usize,
    pub file_id: FileId,
    fs: Rc<RefCell<MockFs>>,
}

impl MockFile {
    pub fn read_all(&self) -> Vec<u8> {
        (*self.fs).borrow().data[self.file_id].unsynced.clone()
    }

    pub fn read_all_synced(&self) -> Vec<u8> {
        (*self.fs).borrow().data[self.file_id].synced.clone()
    }
}

impl Read for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // TODO: cache the materialized version of the full data.
        let data = self.read_all();
        let min_len = std::cmp::min(data.len().saturating_sub(self.idx), buf.len());
        buf[..min_len].copy_from_slice(&data[self.idx..self.idx + min_len]);
        self.idx += min_len;
        Ok(min_len)
    }
}

impl DbFile for MockFile {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        let data = buf.to_vec();
        (*self.fs)
            .borrow_mut()
            .write(self.file_id, self.idx, data)?;
        self.idx += buf.len();

        Ok(())
    }

    fn sync(&mut self) -> anyhow::Result<()> {
        (*self.fs).borrow_mut().sync(self.file_id)?;
        Ok(())
    }

    fn len(&self) -> anyhow::Result<usize> {
        Ok((*self.fs).borrow().stat(self.file_id).len)
    }
}

struct FileMeta {
    len: usize,
}

#[derive(Clone, Debug)]
pub struct MockDir {
    pub fs: Rc<RefCell<MockFs>>,
}

impl MockDir {
    pub fn new() -> Self {
        MockDir {
            fs: Rc::new(RefCell::new(MockFs::new())),
        }
    }
}

impl Default for MockDir {
    fn default() -> Self {
        Self::new()
    }
}

fn path_string<P>(p: &P) -> String
where
    P: AsRef<Path>,
{
    p.as_ref().to_string_lossy().into_owned()
}

impl DbDir for MockDir {
    type DbFile = MockFile;

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>,
    {
        (*self.fs).borrow_mut().unlink(&path_string(fname))
    }

    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>,
    {
        Ok((*self.fs)
            .borrow_mut()
            .create(&path_string(fname))?
            .map(|file_id| MockFile {
                fs: self.fs.clone(),
                file_id,
                idx: 0,
            }))
    }

    fn open<P>(&mut self, fname: &P) -> Option<Self::DbFile>
    where
        P: AsRef<Path>,
    {
        (*self.fs)
            .borrow_mut()
            .open(&path_string(fname))
            .map(|file_id| MockFile {
                fs: self.fs.clone(),
                file_id,
                idx: 0,
            })
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        (*self.fs)
            .borrow_mut()
            .rename(&path_string(from), &path_string(to))
    }
}

type FileId = usize;

#[derive(Debug, Clone)]
pub enum Event {
    Create(String, FileId),
    Write(FileId, usize, Vec<u8>),
    Sync(FileId),
    Rename(String, String),
    Unlink(String),
    Open(String),
}

impl Event {
    pub fn write_abbrev<W: std::fmt::Write>(&self, w: &mut W) -> std::fmt::Result {
        match self {
            Event::Create(name, file_id) => {
                write!(w, "Create({}, {})", name, file_id)?;
            }
            Event::Write(file_id, idx, contents) => {
                write!(w, "Write({}, {}, ", file_id, idx)?;
                let escaped: String = contents
                    .iter()
                    .flat_map(|ch| std::ascii::escape_default(*ch))
                    .map(char::from)
                    .collect();
                write!(w, "{})", escaped)?;
            }
            Event::Sync(file_id) => {
                write!(w, "Sync({})", file_id)?;
            }
            Event::Rename(from, to) => {
                write!(w, "Rename({}, {})", from, to)?;
            }
            Event::Unlink(name) => {
                write!(w, "Unlink({})", name)?;
            }
            Event::Open(name) => {
                write!(w, "Open({})", name)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockFs {
    names: HashMap<String, FileId>,
    data: Vec<MockData>,
    events: Vec<Event>,

    // After this many "things happen," "crash" the FS, meaning stop accepting
    // writes and discard any unsynced data.
    time_to_crash: Option<usize>,
}

impl MockFs {
    fn new() -> Self {
        MockFs {
            names: HashMap::new(),
            data: Vec::new(),
            events: Vec::new(),
            time_to_crash: None,
        }
    }

    fn check_crashed(&self) -> anyhow::Result<()> {
        if self.time_to_crash == Some(0) {
            Err(io::Error::new(io::ErrorKind::Other, "filesystem is down").into())
        } else {
            Ok(())
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    // Discard all unsynced state, become uncrashed.
    pub fn reboot(&mut self) {
        for f in self.data.iter_mut() {
            f.unsynced.clear();
            f.unsynced.extend(&f.synced);
        }
        self.time_to_crash = None;
    }

    fn perform_op(&mut self) -> anyhow::Result<()> {
        self.check_crashed()?;
        if let Some(x) = self.time_to_crash {
            self.time_to_crash = Some(x - 1);
        }
        Ok(())
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn stat(&self, file: FileId) -> FileMeta {
        FileMeta {
            len: self.data[file].unsynced.len(),
        }
    }

    fn create(&mut self, path: &str) -> anyhow::Result<Option<FileId>> {
        self.perform_op()?;

        if self.names.contains_key(path) {
            return Ok(None);
        }

        let id = self.data.len();
        self.record(Event::Create(path.to_owned(), id));
        self.names.insert(path.to_owned(), id);
        self.data.push(MockData::default());

        Ok(Some(id))
    }

    fn unlink(&mut self, path: &str) -> anyhow::Result<bool> {
        self.perform_op()?;

        self.record(Event::Unlink(path.to_owned()));
        Ok(self.names.remove(path).is_some())
    }

    fn open(&mut self, path: &str) -> Option<FileId> {
        self.record(Event::Open(path.to_owned()));
        self.names.get(path).cloned()
    }

    fn rename(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        self.perform_op()?;

        self.record(Event::Rename(from.to_owned(), to.to_owned()));

        if let Some(d) = self.names.remove(from) {
            self.names.insert(to.to_owned(), d);
        }

        Ok(())
    }

    fn write(&mut self, file: FileId, idx: usize, data: Vec<u8>) -> anyhow::Result<()> {
        self.perform_op()?;

        let end = idx + data.len();
        if self.data[file].unsynced.len() < end {
            self.data[file].unsynced.resize(end, 0);
        }
        self.data[file].unsynced[idx..end].copy_from_slice(&data);

        self.record(Event::Write(file, idx, data));
        Ok(())
    }

    fn sync(&mut self, file: FileId) -> anyhow::Result<()> {
        self.perform_op()?;

        self.record(Event::Sync(file));
        let d = &mut self.data[file];
        d.synced = d.unsynced.clone();

        Ok(())
    }
}
