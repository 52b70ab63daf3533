//! xsdb Interactive Shell
//!
//! A line-oriented client that drives real wire frames through a
//! `WireSession` over an in-process ring pair. Every command round-trips
//! the full protocol path (encode, ring, dispatch, ring, decode), so the
//! shell doubles as an end-to-end smoke test.

use std::cell::RefCell;
use std::io::{self, BufRead, Write as _};
use std::rc::Rc;

use clap::Parser;

use xsdb::wire::{
    decode_header, encode_frame, join_strings, ring_pair, Op, PeerHandle, RingChannel,
    WATCH_EVENT_REQ_ID, HEADER_SIZE,
};
use xsdb::{Caller, Config, Store, WireSession};
use tracing_subscriber::{fmt, EnvFilter};

/// xsdb shell
#[derive(Parser, Debug)]
#[command(name = "xsdb-shell")]
#[command(about = "Interactive client for the xsdb configuration store")]
#[command(version)]
struct Args {
    /// Domain id to act as
    #[arg(short, long, default_value = "0")]
    domid: u32,

    /// Act as an unprivileged caller (quotas and op gating apply)
    #[arg(short, long)]
    unprivileged: bool,

    /// Restore the store from a snapshot file before starting
    #[arg(short, long)]
    snapshot: Option<String>,
}

struct Shell {
    session: WireSession<RingChannel>,
    peer: PeerHandle,
    next_req_id: u32,
    tx_id: u32,
    rsp_stage: Vec<u8>,
}

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,xsdb=info"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let caller = if args.unprivileged {
        Caller::unprivileged(args.domid)
    } else {
        Caller::privileged(args.domid)
    };

    let config = Config::default();
    let store = match &args.snapshot {
        Some(path) => match load_snapshot(path, config.clone(), args.domid) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("failed to restore snapshot {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Store::new(config.clone()),
    };

    let store = Rc::new(RefCell::new(store));
    let (channel, peer) = ring_pair(config.ring_capacity);
    let session = WireSession::new(Rc::clone(&store), channel, caller);

    println!("xsdb shell v{} (domid {})", xsdb::VERSION, args.domid);
    println!("type 'help' for commands, 'quit' to exit");

    let mut shell = Shell {
        session,
        peer,
        next_req_id: 1,
        tx_id: 0,
        rsp_stage: Vec::new(),
    };

    let stdin = io::stdin();
    loop {
        print!("xsdb> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("stdin error: {}", e);
                break;
            }
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        match run_command(&mut shell, &store, &parts) {
            Ok(true) => {}
            Ok(false) => break,
            Err(msg) => println!("error: {msg}"),
        }
    }
}

fn load_snapshot(path: &str, config: Config, domid: u32) -> Result<Store, String> {
    let blob = std::fs::read(path).map_err(|e| e.to_string())?;
    let store = xsdb::snapshot::restore(config, &blob, domid, |_, _| {
        Rc::new(|p: &str, t: &str| println!("[watch event] {p} ({t})"))
    })
    .map_err(|e| e.to_string())?;
    Ok(store)
}

fn run_command(
    shell: &mut Shell,
    store: &Rc<RefCell<Store>>,
    parts: &[&str],
) -> Result<bool, String> {
    match parts {
        ["help"] => {
            print_help();
            Ok(true)
        }
        ["quit"] | ["exit"] => Ok(false),
        ["read", path] => shell.request(Op::Read, &join_strings(&[*path])),
        ["write", path, value] => {
            let mut payload = join_strings(&[*path]);
            payload.extend_from_slice(value.as_bytes());
            shell.request(Op::Write, &payload)
        }
        ["mkdir", path] => shell.request(Op::Mkdir, &join_strings(&[*path])),
        ["rm", path] => shell.request(Op::Rm, &join_strings(&[*path])),
        ["ls", path] => shell.request(Op::Directory, &join_strings(&[*path])),
        ["perms", path] => shell.request(Op::GetPerms, &join_strings(&[*path])),
        ["setperms", path, perms @ ..] if !perms.is_empty() => {
            let mut fields = vec![*path];
            fields.extend_from_slice(perms);
            shell.request(Op::SetPerms, &join_strings(&fields))
        }
        ["watch", path, token] => shell.request(Op::Watch, &join_strings(&[*path, *token])),
        ["unwatch", path, token] => shell.request(Op::Unwatch, &join_strings(&[*path, *token])),
        ["txstart"] => shell.request(Op::TransactionStart, &join_strings(&[""])),
        ["commit"] => shell.end_transaction(true),
        ["abort"] => shell.end_transaction(false),
        ["save", path] => {
            let blob = xsdb::snapshot::serialize(&store.borrow()).map_err(|e| e.to_string())?;
            std::fs::write(path, &blob).map_err(|e| e.to_string())?;
            println!("saved {} bytes", blob.len());
            Ok(true)
        }
        ["stats"] => {
            let s = store.borrow();
            println!(
                "nodes={} generation={} transactions={} watches={}",
                s.nr_nodes(),
                s.generation(),
                s.open_transactions(),
                s.watch_count()
            );
            Ok(true)
        }
        _ => Err(format!("unknown command: {}", parts.join(" "))),
    }
}

fn print_help() {
    println!("commands:");
    println!("  read <path>                  read a node's content");
    println!("  write <path> <value>         write content (creates parents)");
    println!("  mkdir <path>                 create an empty node");
    println!("  rm <path>                    remove a node and its subtree");
    println!("  ls <path>                    list child names");
    println!("  perms <path>                 show the permission list");
    println!("  setperms <path> <perm>...    replace the permission list (e.g. n0 r5)");
    println!("  watch <path> <token>         register a watch");
    println!("  unwatch <path> <token>       remove a watch");
    println!("  txstart / commit / abort     transaction control");
    println!("  save <file>                  write a snapshot blob");
    println!("  stats                        store counters");
    println!("  quit                         exit");
}

impl Shell {
    /// Send one frame, run the engine, and print everything that comes back
    fn request(&mut self, op: Op, payload: &[u8]) -> Result<bool, String> {
        let req_id = self.next_req_id;
        self.next_req_id += 1;
        let frame = encode_frame(op as u32, req_id, self.tx_id, payload);

        // The loopback ring is larger than any one frame, but feed it
        // incrementally anyway; partial transfers are part of the protocol
        let mut offset = 0;
        while offset < frame.len() {
            offset += self.peer.push_request(&frame[offset..]);
            self.session.process();
            self.collect_responses(op);
        }
        // Keep processing until the engine goes quiet
        loop {
            let before = self.peer.signal_count();
            self.session.process();
            self.collect_responses(op);
            if self.peer.signal_count() == before {
                break;
            }
        }
        if self.session.is_broken() {
            return Err("channel broken; resetting".to_string());
        }
        Ok(true)
    }

    fn end_transaction(&mut self, commit: bool) -> Result<bool, String> {
        if self.tx_id == 0 {
            return Err("no open transaction".to_string());
        }
        let flag = if commit { "T" } else { "F" };
        let result = self.request(Op::TransactionEnd, &join_strings(&[flag]));
        self.tx_id = 0;
        result
    }

    /// Drain the response ring and print complete frames
    fn collect_responses(&mut self, sent: Op) {
        let mut chunk = [0u8; 256];
        loop {
            let n = self.peer.pull_response(&mut chunk);
            if n == 0 {
                break;
            }
            self.rsp_stage.extend_from_slice(&chunk[..n]);
        }
        while self.rsp_stage.len() >= HEADER_SIZE {
            let header = match decode_header(&self.rsp_stage) {
                Ok(h) => h,
                Err(_) => break,
            };
            let total = HEADER_SIZE + header.len as usize;
            if self.rsp_stage.len() < total {
                break;
            }
            let payload = self.rsp_stage[HEADER_SIZE..total].to_vec();
            self.rsp_stage.drain(..total);
            self.print_frame(sent, header.op, header.req_id, &payload);
        }
    }

    fn print_frame(&mut self, sent: Op, op: u32, req_id: u32, payload: &[u8]) {
        match Op::from_code(op) {
            Ok(Op::WatchEvent) if req_id == WATCH_EVENT_REQ_ID => {
                let text = String::from_utf8_lossy(payload);
                let mut fields = text.split('\0');
                let path = fields.next().unwrap_or("");
                let token = fields.next().unwrap_or("");
                println!("[watch event] {path} ({token})");
            }
            Ok(Op::Error) => {
                let text = String::from_utf8_lossy(payload);
                println!("ERROR {}", text.trim_end_matches('\0'));
            }
            Ok(Op::TransactionStart) => {
                let text = String::from_utf8_lossy(payload);
                let id = text.trim_end_matches('\0');
                self.tx_id = id.parse().unwrap_or(0);
                println!("transaction {id} open");
            }
            Ok(Op::Directory) | Ok(Op::GetPerms) => {
                let text = String::from_utf8_lossy(payload);
                for field in text.split('\0').filter(|f| !f.is_empty()) {
                    println!("{field}");
                }
            }
            Ok(Op::Read) => {
                println!("{}", String::from_utf8_lossy(payload));
            }
            _ => {
                let text = String::from_utf8_lossy(payload);
                let trimmed = text.trim_end_matches('\0');
                if trimmed.is_empty() {
                    println!("ok ({sent:?})");
                } else {
                    println!("{trimmed}");
                }
            }
        }
    }
}
