//! Mounts a [FileSystem] through `/dev/fuse` and serves it from a pool of
//! threads.

use std::io;
use std::path::Path;
use std::sync::Arc;

use fuse_backend_rs::api::filesystem::FileSystem;
use fuse_backend_rs::api::server::Server;
use fuse_backend_rs::transport::{FuseChannel, FuseSession};
use parking_lot::Mutex;
use threadpool::ThreadPool;
use tracing::{error, instrument};

/// One channel to the kernel, and the server dispatching what comes in on
/// it.
struct FuseServer<FS>
where
    FS: FileSystem + Sync + Send,
{
    server: Arc<Server<Arc<FS>>>,
    channel: FuseChannel,
}

#[cfg(target_os = "macos")]
const BADFD: libc::c_int = libc::EBADF;
#[cfg(target_os = "linux")]
const BADFD: libc::c_int = libc::EBADFD;

impl<FS> FuseServer<FS>
where
    FS: FileSystem + Sync + Send,
{
    fn start(&mut self) -> io::Result<()> {
        while let Some((reader, writer)) = self
            .channel
            .get_request()
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?
        {
            if let Err(e) = self.server.handle_message(reader, writer.into(), None, None) {
                match e {
                    // The session was unmounted.
                    fuse_backend_rs::Error::EncodeMessage(e) if e.raw_os_error() == Some(BADFD) => {
                        break;
                    }
                    error => {
                        error!(?error, "failed to handle fuse request");
                        continue;
                    }
                }
            }
        }
        Ok(())
    }
}

fn session_error(e: impl ToString) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// A read-only mount, served by `threads` threads until it is unmounted
/// or dropped.
#[derive(Clone)]
pub struct FuseDaemon {
    session: Arc<Mutex<FuseSession>>,
    threads: Arc<ThreadPool>,
}

impl FuseDaemon {
    #[instrument(skip(fs, mountpoint), fields(mountpoint = ?mountpoint.as_ref()), err)]
    pub fn new<FS, P>(fs: FS, mountpoint: P, threads: usize, allow_other: bool) -> io::Result<Self>
    where
        FS: FileSystem + Sync + Send + 'static,
        P: AsRef<Path>,
    {
        let server = Arc::new(Server::new(Arc::new(fs)));

        let mut session =
            FuseSession::new(mountpoint.as_ref(), "wofs", "", true).map_err(session_error)?;
        #[cfg(target_os = "linux")]
        session.set_allow_other(allow_other);
        session.mount().map_err(session_error)?;

        let pool = threadpool::Builder::new()
            .num_threads(threads)
            .thread_name("fuse_server".to_string())
            .build();

        for _ in 0..threads {
            let mut server = FuseServer {
                server: server.clone(),
                channel: session.new_channel().map_err(session_error)?,
            };
            pool.execute(move || {
                if let Err(error) = server.start() {
                    error!(?error, "fuse server stopped");
                }
            });
        }

        Ok(FuseDaemon {
            session: Arc::new(Mutex::new(session)),
            threads: Arc::new(pool),
        })
    }

    /// Blocks until every server thread has stopped, which happens once the
    /// mount is gone.
    #[instrument(skip_all)]
    pub fn wait(&self) {
        self.threads.join()
    }

    /// Unmounts, then waits for the server threads.
    #[instrument(skip_all, err)]
    pub fn unmount(&self) -> io::Result<()> {
        self.session.lock().umount().map_err(session_error)?;
        self.wait();
        Ok(())
    }
}

impl Drop for FuseDaemon {
    fn drop(&mut self) {
        if let Err(error) = self.unmount() {
            error!(?error, "failed to unmount fuse filesystem")
        }
    }
}
