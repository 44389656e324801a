use esn_link::*;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const FILE_ADDR: &str = "0.0.0.0:5001";
const CMD_ADDR: &str = "0.0.0.0:5002";
const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EsnConfig::from_json_file(path)?,
        None => EsnConfig::default(),
    };
    println!("🌀 esn-link receiver");
    println!("📡 Files on {FILE_ADDR}, commands on {CMD_ADDR}\n");

    // Frames and commands arrive on separate threads; the mutex serializes
    // every mutation of the session.
    let link = Arc::new(Mutex::new(Link::new(config)?));

    let cmd_link = Arc::clone(&link);
    let cmd_listener = TcpListener::bind(CMD_ADDR)?;
    thread::spawn(move || {
        for stream in cmd_listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(e) = handle_command(stream, &cmd_link) {
                        eprintln!("❌ Command error: {e}");
                    }
                }
                Err(e) => eprintln!("❌ Accept error: {e}"),
            }
        }
    });

    let file_listener = TcpListener::bind(FILE_ADDR)?;
    for stream in file_listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(e) = handle_files(stream, &link) {
                    eprintln!("❌ Connection error: {e}");
                }
            }
            Err(e) => eprintln!("❌ Accept error: {e}"),
        }
    }
    Ok(())
}

fn handle_files(mut stream: TcpStream, link: &Mutex<Link>) -> anyhow::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = vec![0u8; esn_link::link::READ_CHUNK];

    // One connection per frame: a timeout ends the connection, unlike
    // `Link::serve` which keeps waiting.
    loop {
        let read = stream.read(&mut buf);
        let step = lock(link).on_read(read, &buf, Idle::Close)?;
        for d in &step.dispatched {
            print_dispatched(d)?;
        }
        if !step.open {
            return Ok(());
        }
    }
}

fn handle_command(mut stream: TcpStream, link: &Mutex<Link>) -> anyhow::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf)?;
    println!("📥 Command: {}", String::from_utf8_lossy(&buf[..n]).trim());

    match lock(link).command(&buf[..n]) {
        Ok(Some(report)) => println!("{}", serde_json::to_string_pretty(&report)?),
        Ok(None) => {}
        Err(e) => println!("⚠️  {e}"),
    }
    Ok(())
}

fn print_dispatched(d: &Dispatched) -> anyhow::Result<()> {
    match &d.result {
        Ok(Applied::Installed(tag)) => println!("📦 {} installed", tag.name()),
        Ok(Applied::Targets { samples }) => println!("🎯 {samples} target sample(s)"),
        Ok(Applied::Queued { samples }) => println!("⏳ {samples} sample(s) pending"),
        Ok(Applied::Ran(report)) => {
            println!("🧮 Ran {} sample(s), {} compared", report.samples, report.compared);
            if let Some(db) = report.cumulative.mse_db() {
                println!("   Overall NMSE: {db:.2} dB");
            }
        }
        Err(e) if e.is_recoverable() => println!("⚠️  [{}] {e} (re-send)", d.tag),
        Err(e) => anyhow::bail!("{e}"),
    }
    Ok(())
}

fn lock(link: &Mutex<Link>) -> std::sync::MutexGuard<'_, Link> {
    // A panic while holding the lock leaves the session usable.
    link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
