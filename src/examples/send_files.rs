use esn_link::parse::format_values;
use esn_link::*;
use rand::Rng;
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

const FILE_PORT: u16 = 5001;
const CMD_PORT: u16 = 5002;
const SAMPLES: usize = 120;
const SAMPLES_PER_CHUNK: usize = 10;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let host = args.get(1).map(String::as_str).unwrap_or("127.0.0.1");
    let config = match args.get(2) {
        Some(path) => EsnConfig::from_json_file(path)?,
        None => EsnConfig::default(),
    };

    println!("🌀 esn-link sender -> {host}");
    println!(
        "   inputs={} neurons={} outputs={} trailer={}",
        config.inputs, config.neurons, config.outputs, config.trailer
    );

    let mut rng = rand::thread_rng();
    let w_in: Vec<f32> = (0..config.neurons * config.inputs)
        .map(|_| rng.gen_range(-0.5..0.5))
        .collect();
    // small recurrent weights keep the reservoir contractive
    let scale = 0.9 / config.neurons as f32;
    let w_x: Vec<f32> = (0..config.neurons * config.neurons)
        .map(|_| rng.gen_range(-scale..scale))
        .collect();
    let data_in: Vec<f32> = (0..SAMPLES * config.inputs)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    // target: running mean of the first few inputs of each sample
    let data_out: Vec<f32> = data_in
        .chunks_exact(config.inputs)
        .flat_map(|x| {
            let mean = x.iter().take(4).sum::<f32>() / 4.0;
            std::iter::repeat(mean).take(config.outputs)
        })
        .collect();

    println!("\n1️⃣  Resetting and enabling training...");
    send_command(host, "RESET")?;
    send_command(host, "TRN_ON")?;

    println!("\n2️⃣  Sending matrices...");
    send_values(host, FrameTag::WeightsIn, &w_in, config.trailer)?;
    send_values(host, FrameTag::WeightsRes, &w_x, config.trailer)?;

    println!("\n3️⃣  Sending ground truth ({SAMPLES} samples)...");
    send_values(host, FrameTag::DataOut, &data_out, config.trailer)?;

    println!("\n4️⃣  Streaming inputs in chunks of {SAMPLES_PER_CHUNK}...");
    for chunk in data_in.chunks(SAMPLES_PER_CHUNK * config.inputs) {
        send_values(host, FrameTag::DataIn, chunk, config.trailer)?;
        sleep(Duration::from_millis(200));
    }

    if let Some(dir) = args.get(3) {
        println!("\n5️⃣  Sending files from {dir}...");
        for (name, tag) in [
            ("w_in.dat", FrameTag::WeightsIn),
            ("w_x.dat", FrameTag::WeightsRes),
            ("w_out.dat", FrameTag::WeightsOut),
        ] {
            let path = Path::new(dir).join(name);
            if path.exists() {
                let payload = std::fs::read(&path)?;
                send_frame(host, tag.wire_id(), &payload, config.trailer)?;
            }
        }
    }

    println!("\n🎉 Done");
    Ok(())
}

fn send_values(host: &str, tag: FrameTag, values: &[f32], trailer: bool) -> anyhow::Result<()> {
    send_frame(host, tag.wire_id(), format_values(values).as_bytes(), trailer)
}

fn send_frame(host: &str, tag: &[u8], payload: &[u8], trailer: bool) -> anyhow::Result<()> {
    let bytes = encode_frame(tag, payload, trailer)?;
    let mut stream = TcpStream::connect((host, FILE_PORT))?;
    stream.write_all(&bytes)?;
    stream.flush()?;
    println!(
        "✅ Sent {} ({} payload bytes)",
        String::from_utf8_lossy(tag),
        payload.len()
    );
    Ok(())
}

fn send_command(host: &str, keyword: &str) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect((host, CMD_PORT))?;
    stream.write_all(keyword.as_bytes())?;
    println!("✅ Sent command {keyword}");
    sleep(Duration::from_millis(100));
    Ok(())
}
