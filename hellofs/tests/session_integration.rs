//! End-to-end session tests over the in-memory kernel channel.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;

use hellofs::channel::{memory_channel, MemoryKernel};
use hellofs::config::SessionConfig;
use hellofs::fs::{Entry, Filesystem, FsFuture, NodeId, Opened, RequestContext};
use hellofs::hello::{HelloFs, HELLO_CONTENT};
use hellofs::mount::{MountResult, Unmount};
use hellofs::session::{Session, SessionResult, SessionState};
use hellofs::wire::{abi, Errno, InitIn, Opcode, Operation, Reply, ReplyBody, Request};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct CountingUnmount {
    calls: AtomicUsize,
}

impl Unmount for CountingUnmount {
    fn unmount(&self, _mountpoint: &Path) -> MountResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `HelloFs` whose reads block until the request is abandoned.
struct SlowReads {
    inner: HelloFs,
    read_started: Arc<Notify>,
}

impl Filesystem for SlowReads {
    fn lookup(&self, ctx: RequestContext, parent: NodeId, name: OsString) -> FsFuture<'_, Entry> {
        self.inner.lookup(ctx, parent, name)
    }

    fn open(&self, ctx: RequestContext, node: NodeId, flags: u32) -> FsFuture<'_, Opened> {
        self.inner.open(ctx, node, flags)
    }

    fn read(
        &self,
        ctx: RequestContext,
        _node: NodeId,
        _fh: u64,
        _offset: u64,
        _size: u32,
    ) -> FsFuture<'_, Bytes> {
        let started = Arc::clone(&self.read_started);
        Box::pin(async move {
            started.notify_one();
            ctx.interrupted().await;
            Ok(Bytes::from_static(HELLO_CONTENT))
        })
    }
}

const KERNEL_FLAGS: u32 = abi::FUSE_ASYNC_READ
    | abi::FUSE_POSIX_LOCKS
    | abi::FUSE_BIG_WRITES
    | abi::FUSE_DO_READDIRPLUS
    | abi::FUSE_MAX_PAGES;

fn init(unique: u64, minor: u32) -> Request {
    Request::new(
        unique,
        0,
        Operation::Init(InitIn {
            major: 7,
            minor,
            max_readahead: 128 * 1024,
            flags: KERNEL_FLAGS,
        }),
    )
}

async fn start(
    fs: Arc<dyn Filesystem>,
    unmount: Arc<CountingUnmount>,
) -> SessionResult<(Session, MemoryKernel)> {
    let (channel, mut kernel) = memory_channel();
    kernel.send_request(&init(1, 36)).unwrap();
    let session = Session::with_channel(
        fs,
        Arc::new(channel),
        PathBuf::from("/mnt/hello"),
        SessionConfig::default().with_shutdown_grace(Duration::from_millis(250)),
        unmount,
    )
    .await?;
    // Consume the INIT reply.
    kernel.recv_raw().await.unwrap();
    Ok((session, kernel))
}

async fn reply(kernel: &mut MemoryKernel, opcode: Opcode) -> Reply {
    let frame = tokio::time::timeout(Duration::from_secs(5), kernel.recv_raw())
        .await
        .expect("no reply within 5s")
        .expect("channel closed");
    Reply::decode(&frame, opcode).unwrap()
}

fn lookup(unique: u64, name: &str) -> Request {
    Request::new(
        unique,
        abi::ROOT_ID,
        Operation::Lookup {
            name: OsString::from(name),
        },
    )
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_init_negotiates_version_and_flags() {
    let (channel, mut kernel) = memory_channel();
    kernel.send_request(&init(1, 36)).unwrap();
    let session = Session::with_channel(
        Arc::new(HelloFs::new()),
        Arc::new(channel),
        PathBuf::from("/mnt/hello"),
        SessionConfig::default(),
        Arc::new(CountingUnmount::default()),
    )
    .await
    .unwrap();

    let reply = reply(&mut kernel, Opcode::Init).await;
    let init = match reply.result {
        Ok(ReplyBody::Init(init)) => init,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!((init.major, init.minor), (7, 31));
    assert_eq!(init.flags & !KERNEL_FLAGS, 0);
    assert_eq!(init.flags & !abi::SUPPORTED_CAPABILITIES, 0);
    assert_ne!(init.flags & abi::FUSE_MAX_PAGES, 0);
    assert_eq!(init.max_pages, session.config().max_pages());
    assert_eq!(session.capabilities(), init.flags);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_older_kernel_gets_compat_reply() {
    let (channel, mut kernel) = memory_channel();
    kernel.send_request(&init(1, 22)).unwrap();
    let session = Session::with_channel(
        Arc::new(HelloFs::new()),
        Arc::new(channel),
        PathBuf::from("/mnt/hello"),
        SessionConfig::default(),
        Arc::new(CountingUnmount::default()),
    )
    .await
    .unwrap();

    let frame = kernel.recv_raw().await.unwrap();
    assert_eq!(frame.len(), abi::OUT_HEADER_SIZE + abi::INIT_OUT_COMPAT_SIZE);
    assert_eq!(session.protocol(), (7, 22));
}

// ============================================================================
// Lookup / forget scenarios
// ============================================================================

#[tokio::test]
async fn test_lookup_hello_and_forget() {
    let unmount = Arc::new(CountingUnmount::default());
    let (mut session, mut kernel) = start(Arc::new(HelloFs::new()), unmount.clone())
        .await
        .unwrap();
    let inodes = session.inode_table();
    let stop = session.unmounter();
    let run = tokio::spawn(async move {
        let result = session.run().await;
        (session, result)
    });

    kernel.send_request(&lookup(2, "hello")).unwrap();
    let entry = match reply(&mut kernel, Opcode::Lookup).await.result {
        Ok(ReplyBody::Entry(entry)) => entry,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(entry.nodeid, 2);
    assert_eq!(entry.attr.mode, libc::S_IFREG | 0o644);
    assert_eq!(entry.attr.size, 5);
    assert_eq!(inodes.lookup_count(2), Some(1));

    kernel
        .send_request(&Request::new(3, 2, Operation::Forget { nlookup: 1 }))
        .unwrap();
    kernel.send_request(&lookup(4, "hello")).unwrap();
    let entry = match reply(&mut kernel, Opcode::Lookup).await.result {
        Ok(ReplyBody::Entry(entry)) => entry,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(entry.nodeid, 3);
    assert_eq!(inodes.resolve(2), None);

    kernel.send_request(&lookup(5, "nope")).unwrap();
    assert_eq!(
        reply(&mut kernel, Opcode::Lookup).await.result,
        Err(Errno::ENOENT)
    );

    stop.request_unmount();
    let (session, result) = run.await.unwrap();
    result.unwrap();
    assert_eq!(session.state(), SessionState::Unmounted);
    assert_eq!(unmount.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_read_hello_contents() {
    let unmount = Arc::new(CountingUnmount::default());
    let (mut session, mut kernel) = start(Arc::new(HelloFs::new()), unmount).await.unwrap();
    let stop = session.unmounter();
    let run = tokio::spawn(async move { session.run().await });

    kernel.send_request(&lookup(2, "hello")).unwrap();
    reply(&mut kernel, Opcode::Lookup).await;

    kernel
        .send_request(&Request::new(
            3,
            2,
            Operation::Open {
                flags: libc::O_RDONLY as u32,
            },
        ))
        .unwrap();
    let fh = match reply(&mut kernel, Opcode::Open).await.result {
        Ok(ReplyBody::Open(open)) => open.fh,
        other => panic!("unexpected {:?}", other),
    };

    kernel
        .send_request(&Request::new(
            4,
            2,
            Operation::Read {
                fh,
                offset: 0,
                size: 4096,
                read_flags: 0,
                lock_owner: 0,
                flags: 0,
            },
        ))
        .unwrap();
    assert_eq!(
        reply(&mut kernel, Opcode::Read).await.result,
        Ok(ReplyBody::Data(Bytes::from_static(b"hello")))
    );

    kernel
        .send_request(&Request::new(
            5,
            2,
            Operation::Open {
                flags: libc::O_WRONLY as u32,
            },
        ))
        .unwrap();
    assert_eq!(
        reply(&mut kernel, Opcode::Open).await.result,
        Err(Errno::EACCES)
    );

    stop.request_unmount();
    run.await.unwrap().unwrap();
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_every_reply_matches_a_request() {
    let unmount = Arc::new(CountingUnmount::default());
    let (mut session, mut kernel) = start(Arc::new(HelloFs::new()), unmount).await.unwrap();
    let stop = session.unmounter();
    let run = tokio::spawn(async move { session.run().await });

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut pending = HashSet::new();
    for unique in 100..400u64 {
        let request = match rng.random_range(0..5) {
            0 => lookup(unique, "hello"),
            1 => lookup(unique, "missing"),
            2 => Request::new(unique, abi::ROOT_ID, Operation::Getattr { fh: None }),
            3 => Request::new(unique, abi::ROOT_ID, Operation::Statfs),
            _ => Request::new(unique, abi::ROOT_ID, Operation::Unsupported { opcode: 4000 }),
        };
        kernel.send_request(&request).unwrap();
        pending.insert(unique);
    }

    while !pending.is_empty() {
        let frame = tokio::time::timeout(Duration::from_secs(5), kernel.recv_raw())
            .await
            .expect("missing replies")
            .unwrap();
        // Only the header matters here; every opcode shares its layout.
        let unique = u64::from_ne_bytes(frame[8..16].try_into().unwrap());
        assert!(pending.remove(&unique), "unexpected reply for {}", unique);
    }
    assert!(kernel.try_recv_raw().is_none());

    stop.request_unmount();
    run.await.unwrap().unwrap();
}

// ============================================================================
// Unmount
// ============================================================================

#[tokio::test]
async fn test_unmount_during_read_discards_reply() {
    let unmount = Arc::new(CountingUnmount::default());
    let read_started = Arc::new(Notify::new());
    let fs = Arc::new(SlowReads {
        inner: HelloFs::new(),
        read_started: Arc::clone(&read_started),
    });
    let (mut session, mut kernel) = start(fs, unmount.clone()).await.unwrap();
    let stop = session.unmounter();
    let metrics = session.metrics();
    let run = tokio::spawn(async move {
        let result = session.run().await;
        (session, result)
    });

    kernel.send_request(&lookup(2, "hello")).unwrap();
    reply(&mut kernel, Opcode::Lookup).await;
    kernel
        .send_request(&Request::new(3, 2, Operation::Open { flags: 0 }))
        .unwrap();
    let fh = match reply(&mut kernel, Opcode::Open).await.result {
        Ok(ReplyBody::Open(open)) => open.fh,
        other => panic!("unexpected {:?}", other),
    };
    kernel
        .send_request(&Request::new(
            4,
            2,
            Operation::Read {
                fh,
                offset: 0,
                size: 4096,
                read_flags: 0,
                lock_owner: 0,
                flags: 0,
            },
        ))
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), read_started.notified())
        .await
        .unwrap();

    stop.request_unmount();
    let (session, result) = run.await.unwrap();
    result.unwrap();

    // Descriptor closed with no reply for the abandoned READ.
    assert!(kernel.recv_raw().await.is_none());
    assert_eq!(session.state(), SessionState::Unmounted);
    assert_eq!(unmount.calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.snapshot().abandoned, 1);

    drop(session);
    assert_eq!(unmount.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_kernel_unmount_needs_no_helper() {
    let unmount = Arc::new(CountingUnmount::default());
    let (mut session, mut kernel) = start(Arc::new(HelloFs::new()), unmount.clone())
        .await
        .unwrap();

    kernel.send_request(&Request::new(2, 0, Operation::Destroy)).unwrap();
    session.run().await.unwrap();

    assert_eq!(
        reply(&mut kernel, Opcode::Destroy).await.result,
        Ok(ReplyBody::Empty)
    );
    assert_eq!(session.state(), SessionState::Unmounted);
    assert_eq!(unmount.calls.load(Ordering::SeqCst), 0);
}
