//! polyvox CLI — plays a short chord demo live or exports it to WAV.
//!
//! Usage:
//!   pv-cli
//!   pv-cli --wav output.wav

use pv_master::{Controller, NoteParams};
use std::time::Duration;
use std::{env, fs};

const CHORDS: &[&[u8]] = &[
    &[60, 64, 67],
    &[57, 60, 64],
    &[53, 57, 60],
    &[55, 59, 62, 65],
];

const CHORD_SECONDS: f64 = 0.8;
const HOLD_SECONDS: f64 = 0.6;

fn main() {
    let args: Vec<String> = env::args().collect();
    let wav_path = args
        .iter()
        .position(|a| a == "--wav")
        .and_then(|i| args.get(i + 1))
        .cloned();

    match wav_path {
        Some(path) => render_to_wav(&path),
        None => play_live(),
    }
}

fn play_live() {
    let mut ctrl = Controller::new();
    if let Err(e) = ctrl.play() {
        eprintln!("Failed to start audio: {}", e);
        std::process::exit(1);
    }
    println!("Playing at {} Hz...", ctrl.sample_rate().unwrap_or(0));

    for chord in CHORDS {
        let Some(control) = ctrl.control() else { break };
        let mut ids = Vec::new();
        for &key in *chord {
            if let Ok(id) = control.note_attack(0, NoteParams::from_midi(key, 100), 0) {
                ids.push(id);
            }
        }
        std::thread::sleep(Duration::from_secs_f64(HOLD_SECONDS));

        let Some(control) = ctrl.control() else { break };
        for id in ids {
            let _ = control.note_release(0, id, 0);
        }
        std::thread::sleep(Duration::from_secs_f64(CHORD_SECONDS - HOLD_SECONDS));
    }

    // Let the release tails ring out.
    std::thread::sleep(Duration::from_millis(400));
    ctrl.stop();
    println!("Done.");
}

fn render_to_wav(path: &str) {
    let sample_rate: u32 = 44100;
    println!("Rendering to {} at {} Hz...", path, sample_rate);

    let chord_frames = (sample_rate as f64 * CHORD_SECONDS) as u64;
    let hold_frames = (sample_rate as f64 * HOLD_SECONDS) as u64;
    let mut next_chord = 0usize;
    let mut releases: Vec<(u64, u32)> = Vec::new();

    let ctrl = Controller::new();
    let wav = ctrl.render_to_wav(sample_rate, 4, move |control, frame| {
        if next_chord < CHORDS.len() && frame >= next_chord as u64 * chord_frames {
            for &key in CHORDS[next_chord] {
                if let Ok(id) = control.note_attack(0, NoteParams::from_midi(key, 100), 0) {
                    releases.push((frame + hold_frames, id));
                }
            }
            next_chord += 1;
        }
        releases.retain(|&(at, id)| {
            if frame >= at {
                let _ = control.note_release(0, id, 0);
                false
            } else {
                true
            }
        });
    });

    match wav {
        Ok(bytes) => {
            println!("Rendered {} bytes", bytes.len());
            if let Err(e) = fs::write(path, &bytes) {
                eprintln!("Failed to write {}: {}", path, e);
                std::process::exit(1);
            }
            println!("Done.");
        }
        Err(e) => {
            eprintln!("Render failed: {}", e);
            std::process::exit(1);
        }
    }
}
