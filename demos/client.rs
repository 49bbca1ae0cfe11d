//! Connect to a camera port and print what arrives.
//!
//! Usage:
//!   cargo run --example client -- 127.0.0.1:3800 [stream|pose|calibration] [divisor]

use std::io::Write;
use std::net::TcpStream;
use std::time::Instant;
use vlcstream::protocol::{self, StreamRequest, VLC_HEIGHT, VLC_WIDTH};
use vlcstream::{Profile, StreamMode};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let addr = args.get(1).map(String::as_str).unwrap_or("127.0.0.1:3800");
    let mode = match args.get(2).map(String::as_str).unwrap_or("pose") {
        "stream" => StreamMode::Stream,
        "pose" => StreamMode::StreamWithPose,
        "calibration" => StreamMode::Calibration,
        other => {
            eprintln!("Unknown mode '{}' (stream|pose|calibration)", other);
            std::process::exit(2);
        }
    };
    let divisor = args.get(3).and_then(|d| d.parse().ok()).unwrap_or(1u8);

    let mut stream = match TcpStream::connect(addr) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if mode == StreamMode::Calibration {
        if let Err(e) = stream.write_all(&[mode as u8]) {
            eprintln!("Failed to send request: {}", e);
            std::process::exit(1);
        }
        match protocol::read_calibration(&mut stream, (VLC_WIDTH * VLC_HEIGHT) as usize) {
            Ok(c) => {
                println!("uv2x: {} entries", c.uv2x.len());
                println!("extrinsics: {:?}", c.extrinsics);
                println!("k: {:?}", c.k);
            }
            Err(e) => eprintln!("Failed to read calibration: {}", e),
        }
        return;
    }

    let request = StreamRequest {
        mode,
        divisor,
        profile: Profile::H264Main,
        bitrate: 1_000_000,
        options: Vec::new(),
    }
    .with_exposure_factor(50.0);

    if let Err(e) = stream.write_all(&request.to_bytes()) {
        eprintln!("Failed to send request: {}", e);
        std::process::exit(1);
    }

    let with_pose = mode == StreamMode::StreamWithPose;
    let start = Instant::now();
    let mut count: u64 = 0;

    loop {
        match protocol::read_unit(&mut stream, with_pose) {
            Ok(unit) => {
                count += 1;
                if count % 30 == 1 {
                    match unit.pose {
                        Some(p) => println!(
                            "ts={:<14} len={:<8} t=[{:+.3}, {:+.3}, {:+.3}]",
                            unit.timestamp,
                            unit.payload.len(),
                            p.m[0][3],
                            p.m[1][3],
                            p.m[2][3]
                        ),
                        None => println!("ts={:<14} len={}", unit.timestamp, unit.payload.len()),
                    }
                }
            }
            Err(e) => {
                eprintln!("Stream ended: {}", e);
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} units in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );
}
