//! Retune CLI - vocal pitch analysis and resynthesis
//!
//! Command-line shell over the retune engine: analyze takes into project
//! files, render edited projects back to audio, export MIDI.

use clap::{Parser, Subcommand};
use retune::analysis::{run_pipeline, AnalysisConfig, AnalysisStage};
use retune::audio::{load_audio, save_samples};
use retune::config::AppConfig;
use retune::f0::F0Detector;
use retune::midi::{export_midi, MidiExportOptions};
use retune::model::ModelCache;
use retune::notes::SegmenterChoice;
use retune::project::{load_project, save_project, Project};
use retune::vocoder::{Vocoder, VocoderConfig};
use retune::{Error, SAMPLE_RATE};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

#[derive(Parser)]
#[command(
    name = "retune",
    about = "Monophonic vocal pitch editor engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an audio file into a project
    Analyze {
        /// Input audio file (WAV, MP3, FLAC, AIFF)
        #[arg(short, long)]
        input: PathBuf,

        /// Output project file
        #[arg(short, long)]
        output: PathBuf,

        /// F0 detector: yin, fcpe, rmvpe
        #[arg(short, long)]
        detector: Option<String>,

        /// Model directory
        #[arg(short, long, default_value = "models")]
        model_dir: PathBuf,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Render a project's edited pitch back to audio
    Render {
        /// Input project file
        #[arg(short, long)]
        project: PathBuf,

        /// Output WAV path
        #[arg(short, long, default_value = "render.wav")]
        output: PathBuf,

        /// Model directory
        #[arg(short, long, default_value = "models")]
        model_dir: PathBuf,
    },

    /// Export a project's notes as a Standard MIDI File
    ExportMidi {
        /// Input project file
        #[arg(short, long)]
        project: PathBuf,

        /// Output MIDI path
        #[arg(short, long, default_value = "notes.mid")]
        output: PathBuf,

        /// Tempo in beats per minute
        #[arg(long, default_value = "120")]
        tempo: f64,

        /// Pulses per quarter note
        #[arg(long, default_value = "480")]
        ppq: u16,

        /// MIDI channel (0-15)
        #[arg(long, default_value = "0")]
        channel: u8,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "retune.yaml")]
        output: PathBuf,
    },

    /// Show information about the engine
    Info,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Invalid arguments exit with code 1; help and version exit clean.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = run(cli) {
        if !e.is_cancellation() {
            eprintln!("error: {}", e);
        }
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> retune::Result<()> {
    match cli.command {
        Commands::Analyze {
            input,
            output,
            detector,
            model_dir,
            config,
        } => {
            let app_config = match config {
                Some(path) => AppConfig::load(path)?,
                None => AppConfig::default(),
            };

            let detector = match detector.as_deref() {
                Some("yin") => F0Detector::Yin,
                Some("fcpe") => F0Detector::Fcpe,
                Some("rmvpe") => F0Detector::Rmvpe,
                Some(other) => {
                    return Err(Error::Config(format!("unknown detector '{}'", other)))
                }
                None => app_config.detector,
            };

            log::info!("Analyzing {}", input.display());
            let clip = load_audio(&input, Some(SAMPLE_RATE))?;
            log::info!("Loaded {:.2}s of audio", clip.duration());

            let analysis_config = AnalysisConfig {
                detector,
                segmenter: SegmenterChoice::Model,
                model_dir,
                ..Default::default()
            };

            let cancel = AtomicBool::new(false);
            let progress = |stage: AnalysisStage| {
                log::info!("[{:>3.0}%] {}", stage.fraction() * 100.0, stage.key());
            };
            let result =
                run_pipeline(&analysis_config, &clip.samples, SAMPLE_RATE, &cancel, &progress)?;

            let mut project = Project::new();
            project.name = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string();
            project.audio_path = input.clone();
            project.source_sample_rate = clip.sample_rate;
            result.install(&mut project)?;
            project.waveform.replace(clip.samples);

            save_project(&project, &output)?;

            println!(
                "✓ Analyzed {} frames, {} notes -> {}",
                project.num_frames(),
                project.notes.len(),
                output.display()
            );
        }

        Commands::Render {
            project,
            output,
            model_dir,
        } => {
            let proj = load_project(&project)?;
            if proj.num_frames() == 0 {
                return Err(Error::InvalidState("project holds no analysis".into()));
            }

            // The project file does not carry features; rebuild mel from
            // the referenced audio.
            log::info!("Loading source audio {}", proj.audio_path.display());
            let clip = load_audio(&proj.audio_path, Some(SAMPLE_RATE))?;
            let mel = retune::audio::mel_spectrogram(
                &clip.samples,
                &retune::audio::AudioConfig::default(),
            )?;

            let frames = proj.num_frames().min(mel.ncols());
            let f0 = proj.compose_f0_range(0..frames, false, proj.global_pitch_offset);
            let mel = mel.slice(ndarray::s![.., ..frames]).to_owned();

            let cache = ModelCache::new(&model_dir);
            let vocoder = match Vocoder::load(&cache, VocoderConfig::default()) {
                Ok(vocoder) => vocoder,
                Err(e) => {
                    log::warn!("{}; rendering with DSP fallback synthesis", e);
                    Vocoder::fallback(VocoderConfig::default())
                }
            };

            log::info!("Synthesizing {} frames", frames);
            let pcm = vocoder.infer(&mel, &f0)?;
            if pcm.is_empty() {
                return Err(Error::SynthesisFailure("vocoder returned no audio".into()));
            }

            save_samples(&output, &pcm, SAMPLE_RATE)?;
            println!("✓ Rendered {:.2}s -> {}", pcm.len() as f32 / SAMPLE_RATE as f32, output.display());
        }

        Commands::ExportMidi {
            project,
            output,
            tempo,
            ppq,
            channel,
        } => {
            if tempo <= 0.0 {
                return Err(Error::Config("tempo must be positive".into()));
            }
            if channel > 15 {
                return Err(Error::Config("channel must be 0-15".into()));
            }

            let proj = load_project(&project)?;
            let options = MidiExportOptions {
                tempo_bpm: tempo,
                ppq,
                channel,
                ..Default::default()
            };
            export_midi(&proj.notes, &options, &output)?;

            let exported = proj.notes.iter().filter(|n| !n.rest).count();
            println!("✓ Exported {} notes -> {}", exported, output.display());
        }

        Commands::InitConfig { output } => {
            let config = AppConfig::default();
            config.save(&output)?;
            println!("✓ Configuration saved to {}", output.display());
        }

        Commands::Info => {
            println!("Retune - Monophonic Vocal Pitch Editor Engine");
            println!("==============================================");
            println!("Version: {}", retune::VERSION);
            println!("Platform: {}", std::env::consts::OS);
            println!();
            println!("Sample rate: {} Hz", retune::SAMPLE_RATE);
            println!("Hop size: {} samples", retune::HOP_SIZE);
            println!("FFT size: {}", retune::N_FFT);
            println!("Mel bands: {}", retune::N_MELS);
            println!();
            println!("F0 detectors: yin (built-in), fcpe, rmvpe");
            println!("Vocoder: pc_nsf_hifigan");
            println!("CPU cores: {}", num_cpus::get());
        }
    }

    Ok(())
}
