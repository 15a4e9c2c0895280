/*
 * lock.rs
 *
 * One run at a time per command per user.
 *
 * The lock is flock(LOCK_EX|LOCK_NB) on
 *     <tmpdir>/cron-wrapper_<uid>_<key>.lock
 * where key is a 128-bit digest of the full assembled command. Same bytes,
 * same lock.
 *
 * The file itself means nothing, only the flock on it does. A crashed run
 * leaves the file behind and the kernel drops the flock, so the next run
 * simply locks it again.
 *
 * Unlinking on release has a classic race: B opens the old inode, A
 * unlinks, C creates a new file, now B and C both "hold" the lock. After
 * locking we check that the path still points at the inode we locked and
 * start over if it doesn't.
 */

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/* file name prefix, shared with older cron-wrapper installs */
const LOCK_PREFIX: &str = "cron-wrapper";

/* retry granularity while someone else holds the lock */
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound on how long `acquire` waits for a held lock.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// 128-bit digest of a command string, as 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Derive the key from the exact bytes of the command.
    ///
    /// ```
    /// use cronwrap::lock::LockKey;
    ///
    /// let a = LockKey::from_command("backup.sh --full");
    /// let b = LockKey::from_command("backup.sh --full");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 32);
    /// assert_ne!(a, LockKey::from_command("backup.sh --incremental"));
    /// ```
    #[must_use]
    pub fn from_command(command: &str) -> Self {
        let digest = Sha256::digest(command.as_bytes());
        Self(hex::encode(&digest[..16]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A not-yet-acquired lock: where it lives and what it's keyed by.
#[derive(Debug, Clone)]
pub struct SingleInstanceLock {
    path: PathBuf,
}

impl SingleInstanceLock {
    /// Lock for `key` inside `dir`, namespaced by the current uid.
    #[must_use]
    pub fn new(dir: &Path, key: &LockKey) -> Self {
        // SAFETY: getuid() has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        let name = format!("{LOCK_PREFIX}_{uid}_{}.lock", key.as_str());
        Self {
            path: dir.join(name),
        }
    }

    /// Lock for `command` in the system temp dir.
    #[must_use]
    pub fn for_command(command: &str) -> Self {
        Self::new(&std::env::temp_dir(), &LockKey::from_command(command))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock, retrying for at most `wait`.
    ///
    /// Returns `None` if another process still holds it when `wait` runs
    /// out, or if the lock file can't be opened or locked at all. A zero
    /// `wait` makes exactly one attempt. A `wait` too large to represent as
    /// a deadline waits without one.
    #[must_use]
    pub fn acquire(&self, wait: Duration) -> Option<LockHandle> {
        let deadline = Instant::now().checked_add(wait);

        loop {
            match self.attempt() {
                Ok(Some(handle)) => {
                    debug!(lock_path = %self.path.display(), "acquired lock");
                    return Some(handle);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(lock_path = %self.path.display(), error = %e, "lock file unusable");
                    return None;
                }
            }

            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(lock_path = %self.path.display(), "lock still held, giving up");
                        return None;
                    }
                    LOCK_POLL_INTERVAL.min(deadline - now)
                }
                None => LOCK_POLL_INTERVAL,
            };
            thread::sleep(nap);
        }
    }

    /* one attempt, plus one immediate retry if the file was swapped under us */
    fn attempt(&self) -> io::Result<Option<LockHandle>> {
        retry_replaced(|| self.try_acquire())
    }

    /* one flock attempt on whatever the path names right now */
    fn try_acquire(&self) -> io::Result<Attempt> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file`
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(Attempt::Held);
            }
            return Err(err);
        }

        self.check_still_named(file)
    }

    /* did a releasing holder unlink the file between our open and flock? */
    fn check_still_named(&self, file: File) -> io::Result<Attempt> {
        let held = file.metadata()?;
        match fs::metadata(&self.path) {
            Ok(on_disk) if on_disk.dev() == held.dev() && on_disk.ino() == held.ino() => {
                Ok(Attempt::Acquired(LockHandle {
                    file: Some(file),
                    path: self.path.clone(),
                }))
            }
            _ => {
                debug!(lock_path = %self.path.display(), "lock file replaced");
                Ok(Attempt::Replaced)
            }
        }
    }
}

/* result of a single flock attempt */
#[derive(Debug)]
enum Attempt {
    Acquired(LockHandle),
    /* someone else holds the flock */
    Held,
    /* we locked an inode the path no longer names */
    Replaced,
}

/*
 * A replaced file means the previous holder just released, so the lock is
 * most likely free: try again right away instead of counting it as
 * contention. Twice in a row is treated as held.
 */
fn retry_replaced(
    mut try_once: impl FnMut() -> io::Result<Attempt>,
) -> io::Result<Option<LockHandle>> {
    for _ in 0..2 {
        match try_once()? {
            Attempt::Acquired(handle) => return Ok(Some(handle)),
            Attempt::Held => return Ok(None),
            Attempt::Replaced => {}
        }
    }
    Ok(None)
}

/// Exclusive ownership of a lock file.
///
/// `release` consumes the handle, so there's no way to release a lock that
/// was never acquired, and no way to release twice. Dropping an unreleased
/// handle releases it.
#[derive(Debug)]
pub struct LockHandle {
    file: Option<File>,
    path: PathBuf,
}

impl LockHandle {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort delete the file, unlock, close the descriptor.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        /* unlink while still holding the flock so nobody locks the doomed inode */
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(lock_path = %self.path.display(), error = %e, "could not remove lock file");
        }

        // SAFETY: fd is valid until `file` is dropped below
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
        drop(file);

        debug!(lock_path = %self.path.display(), "released lock");
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_key_is_deterministic() {
        let a = LockKey::from_command("echo hello");
        let b = LockKey::from_command("echo hello");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_distinguishes_whitespace() {
        /* byte identity, no normalization */
        assert_ne!(
            LockKey::from_command("echo hello"),
            LockKey::from_command("echo  hello")
        );
    }

    #[test]
    fn test_for_command_uses_temp_dir() {
        let lock = SingleInstanceLock::for_command("echo hello");
        assert_eq!(lock.path().parent(), Some(std::env::temp_dir().as_path()));
    }

    #[test]
    fn test_lock_file_name_format() {
        let dir = TempDir::new().unwrap();
        let key = LockKey::from_command("true");
        let lock = SingleInstanceLock::new(dir.path(), &key);

        let name = lock.path().file_name().unwrap().to_str().unwrap();
        // SAFETY: getuid() has no preconditions
        let uid = unsafe { libc::getuid() };
        assert_eq!(name, format!("cron-wrapper_{uid}_{}.lock", key.as_str()));
        assert_eq!(lock.path().parent().unwrap(), dir.path());
    }

    #[test]
    fn test_acquire_and_release_removes_file() {
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));

        let handle = lock.acquire(Duration::ZERO).unwrap();
        assert!(handle.path().exists());
        handle.release();
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_sequential_acquire_always_succeeds() {
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));

        for _ in 0..3 {
            let handle = lock.acquire(Duration::ZERO).expect("lock should be free");
            handle.release();
        }
    }

    #[test]
    fn test_held_lock_blocks_second_acquire() {
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));

        let _held = lock.acquire(Duration::ZERO).unwrap();
        /* flock is per open file description, so a second open conflicts */
        assert!(lock.acquire(Duration::ZERO).is_none());
    }

    #[test]
    fn test_acquire_waits_at_most_the_bound() {
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));
        let _held = lock.acquire(Duration::ZERO).unwrap();

        let start = Instant::now();
        assert!(lock.acquire(Duration::from_millis(300)).is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250), "gave up too early");
        assert!(elapsed < Duration::from_secs(2), "waited too long");
    }

    #[test]
    fn test_acquire_succeeds_once_holder_releases() {
        let dir = TempDir::new().unwrap();
        let lock = Arc::new(SingleInstanceLock::new(
            dir.path(),
            &LockKey::from_command("a"),
        ));
        let held = lock.acquire(Duration::ZERO).unwrap();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.acquire(Duration::from_secs(3)).is_some())
        };

        thread::sleep(Duration::from_millis(200));
        held.release();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_different_commands_do_not_contend() {
        let dir = TempDir::new().unwrap();
        let a = SingleInstanceLock::new(dir.path(), &LockKey::from_command("job a"));
        let b = SingleInstanceLock::new(dir.path(), &LockKey::from_command("job b"));

        let _ha = a.acquire(Duration::ZERO).unwrap();
        let _hb = b.acquire(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));
        {
            let _handle = lock.acquire(Duration::ZERO).unwrap();
        }
        assert!(lock.acquire(Duration::ZERO).is_some());
    }

    #[test]
    fn test_stale_file_is_reused() {
        /* a crashed run leaves the file behind, unlocked */
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));
        fs::write(lock.path(), b"").unwrap();

        assert!(lock.acquire(Duration::ZERO).is_some());
    }

    #[test]
    fn test_unusable_directory_is_acquisition_failure() {
        let lock = SingleInstanceLock::new(
            Path::new("/nonexistent/cronwrap-test-dir"),
            &LockKey::from_command("a"),
        );
        assert!(lock.acquire(Duration::from_millis(100)).is_none());
    }

    #[test]
    fn test_unbounded_wait_on_free_lock() {
        /* Instant + Duration::MAX overflows; must not panic */
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));
        assert!(lock.acquire(Duration::MAX).is_some());
    }

    #[test]
    fn test_replaced_file_is_not_acquired() {
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));

        /* open the old inode, then swap a new file in under the same name */
        let old = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock.path())
            .unwrap();
        fs::remove_file(lock.path()).unwrap();
        fs::write(lock.path(), b"").unwrap();

        assert!(matches!(
            lock.check_still_named(old).unwrap(),
            Attempt::Replaced
        ));
    }

    #[test]
    fn test_replaced_then_free_is_acquired_without_waiting() {
        let dir = TempDir::new().unwrap();
        let lock = SingleInstanceLock::new(dir.path(), &LockKey::from_command("a"));

        let mut calls = 0;
        let got = retry_replaced(|| {
            calls += 1;
            if calls == 1 {
                Ok(Attempt::Replaced)
            } else {
                lock.try_acquire()
            }
        })
        .unwrap();

        assert!(got.is_some());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_replaced_twice_counts_as_held() {
        let mut calls = 0;
        let got = retry_replaced(|| {
            calls += 1;
            Ok(Attempt::Replaced)
        })
        .unwrap();

        assert!(got.is_none());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_held_is_not_retried() {
        let mut calls = 0;
        let got = retry_replaced(|| {
            calls += 1;
            Ok(Attempt::Held)
        })
        .unwrap();

        assert!(got.is_none());
        assert_eq!(calls, 1);
    }
}
