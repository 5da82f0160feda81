//! Offline denoising of a WAV file.
//!
//! Learns a noise profile from the head of the file (assumed to be room
//! tone), then runs the full file through the denoiser pipeline and
//! writes the result, compensating the pipeline latency.
//!
//! Usage:
//!   denoise_wav <input.wav> <output.wav> [learn_seconds] [threshold] [ratio]

use anyhow::{bail, Context, Result};

use aircore::DenoiserPipeline;

const BLOCK_SIZE: usize = 512;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: denoise_wav <input.wav> <output.wav> [learn_seconds] [threshold] [ratio]");
    }

    let input_path = &args[1];
    let output_path = &args[2];
    let learn_seconds: f32 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(1.0);
    let threshold: f32 = args.get(4).map(|s| s.parse()).transpose()?.unwrap_or(0.1);
    let ratio: f32 = args.get(5).map(|s| s.parse()).transpose()?.unwrap_or(1.0);

    let mut reader =
        hound::WavReader::open(input_path).with_context(|| format!("opening {}", input_path))?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    let sample_rate = spec.sample_rate as f32;

    // Deinterleave into f32 channels
    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); num_channels];
    match spec.sample_format {
        hound::SampleFormat::Float => {
            for (i, s) in reader.samples::<f32>().enumerate() {
                channels[i % num_channels].push(s?);
            }
        }
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            for (i, s) in reader.samples::<i32>().enumerate() {
                channels[i % num_channels].push(s? as f32 * scale);
            }
        }
    }

    let num_samples = channels[0].len();
    eprintln!(
        "{}: {} ch, {} Hz, {} samples",
        input_path, num_channels, spec.sample_rate, num_samples
    );

    let mut pipeline = DenoiserPipeline::new(num_channels, sample_rate, BLOCK_SIZE)
        .map_err(|e| anyhow::anyhow!("pipeline setup failed: {}", e))?;
    let params = pipeline.params();
    params.set_threshold(threshold);
    params.set_ratio(ratio);

    // Learn from the head of the file
    let learn_samples = ((learn_seconds * sample_rate) as usize).min(num_samples);
    params.set_learn(true);
    process_range(&mut pipeline, &channels, 0, learn_samples, None);
    params.set_learn(false);
    eprintln!("learned noise profile from {} samples", learn_samples);

    // Flush the learn pass and start clean
    pipeline
        .reset(sample_rate, BLOCK_SIZE)
        .map_err(|e| anyhow::anyhow!("reset failed: {}", e))?;

    let latency = pipeline.latency(BLOCK_SIZE);
    eprintln!("processing at latency {} samples", latency);

    // Feed the file plus `latency` zeros, then drop the first `latency`
    // output samples
    let mut outputs: Vec<Vec<f32>> = vec![Vec::new(); num_channels];
    process_range(&mut pipeline, &channels, 0, num_samples, Some(&mut outputs));

    let zeros: Vec<Vec<f32>> = vec![vec![0.0; latency]; num_channels];
    process_range(&mut pipeline, &zeros, 0, latency, Some(&mut outputs));

    let writer_spec = hound::WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output_path, writer_spec)
        .with_context(|| format!("creating {}", output_path))?;

    for i in latency..(latency + num_samples) {
        for ch in outputs.iter() {
            writer.write_sample(ch[i])?;
        }
    }
    writer.finalize()?;

    eprintln!("wrote {}", output_path);

    Ok(())
}

fn process_range(
    pipeline: &mut DenoiserPipeline,
    channels: &[Vec<f32>],
    start: usize,
    len: usize,
    mut outputs: Option<&mut Vec<Vec<f32>>>,
) {
    let mut pos = start;
    let end = start + len;

    let mut block: Vec<Vec<f32>> = vec![Vec::new(); channels.len()];

    while pos < end {
        let this_len = BLOCK_SIZE.min(end - pos);

        for (ch, data) in block.iter_mut().zip(channels.iter()) {
            ch.clear();
            ch.extend_from_slice(&data[pos..pos + this_len]);
        }

        {
            let mut refs: Vec<&mut [f32]> = block.iter_mut().map(|b| b.as_mut_slice()).collect();
            pipeline.process_block(&mut refs);
        }

        if let Some(outputs) = outputs.as_deref_mut() {
            for (out, ch) in outputs.iter_mut().zip(block.iter()) {
                out.extend_from_slice(ch);
            }
        }

        pos += this_len;
    }
}
