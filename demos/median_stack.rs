// demos/median_stack.rs — per-pixel median of a synthetic frame stack.
//
// Builds N noisy frames of a smooth ramp, sprinkles cosmic-ray hits and a
// hot pixel over them, and removes them with a vertical median filter on
// the GPU (or on the host if no accelerator is available). Prints how many
// corrupted pixels survive and the profiling report.
//
// USAGE
//   RUST_LOG=info cargo run --example median_stack
//   RUST_LOG=info cargo run --example median_stack -- 64      # frame count

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gpu_separator::image::Image;
use gpu_separator::stack::{stack_frames, unstack_pixels};
use gpu_separator::{Error, HostSeparator, Separator};

const HEIGHT: usize = 256;
const WIDTH: usize = 320;
const SPIKE: u16 = 60_000;
const HITS_PER_FRAME: usize = 40;

fn main() -> Result<(), Error> {
    env_logger::init();

    let n: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(15);

    let mut rng = StdRng::seed_from_u64(7);
    let truth = Image::from_fn(HEIGHT, WIDTH, |r, c| (1000 + r + c) as u16);
    let frames: Vec<Image<u16>> = (0..n)
        .map(|_| {
            let mut f = Image::from_fn(HEIGHT, WIDTH, |r, c| {
                truth.get(r, c) + rng.gen_range(0u16..8)
            });
            for _ in 0..HITS_PER_FRAME {
                let (r, c) = (rng.gen_range(0..HEIGHT), rng.gen_range(0..WIDTH));
                f.set(r, c, SPIKE);
            }
            // Hot pixel: always saturated in a third of the frames.
            if rng.gen_range(0..3) == 0 {
                f.set(10, 10, SPIKE);
            }
            f
        })
        .collect();

    let stacked = stack_frames(&frames)?;
    println!("stack: {n} frames of {HEIGHT}×{WIDTH} → {:?}", stacked.shape());

    let t0 = Instant::now();
    let medians = match Separator::new(n, HEIGHT * WIDTH, true) {
        Ok(mut sep) => {
            println!("device: {}", sep.device().adapter_info);
            let out = sep.filter_vertical(&stacked)?.get()?;
            // Second pass shows the amortized cost once buffers exist.
            let out2 = sep.filter_vertical(&stacked)?.get()?;
            assert_eq!(out, out2);
            println!("{}", sep.log_profile());
            out
        }
        Err(Error::NoDeviceAvailable { reason }) => {
            println!("no accelerator ({reason}); using host separator");
            HostSeparator::new(n, HEIGHT * WIDTH)?.filter_vertical(&stacked)?
        }
        Err(e) => return Err(e),
    };
    println!("filtered in {:.2} ms", t0.elapsed().as_secs_f64() * 1000.0);

    let clean = unstack_pixels(&medians, HEIGHT, WIDTH)?;
    let corrupted_in = frames[0].as_slice().iter().filter(|&&v| v == SPIKE).count();
    let corrupted_out = clean.as_slice().iter().filter(|&&v| v >= SPIKE as f32).count();
    let max_err = clean
        .as_slice()
        .iter()
        .zip(truth.as_slice())
        .map(|(&m, &t)| (m - t as f32).abs())
        .fold(0.0f32, f32::max);

    println!("spikes in frame 0: {corrupted_in}, in median frame: {corrupted_out}");
    println!("max deviation from truth: {max_err:.1} counts");
    Ok(())
}
