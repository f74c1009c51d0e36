//! Prints hand landmarks detected in the webcam stream.
//!
//! Usage: `webcam_landmarks [cpu|gpu] [seconds]`, with `HANDFEED_PALM_MODEL` and
//! `HANDFEED_LANDMARK_MODEL` set to model paths or URLs. Runs until killed if no duration is given.

use std::{env, thread, time::Duration};

use anyhow::bail;
use handfeed::{
    config::FeedConfig, feed::HandFeed, nn::Delegate, pointer::HandPointer,
    resolution::Resolution,
};

fn main() -> anyhow::Result<()> {
    handfeed::init_logger!();

    let mut args = env::args().skip(1);
    let delegate = match args.next().as_deref() {
        None | Some("cpu") => Delegate::Cpu,
        Some("gpu") => Delegate::Gpu,
        Some(other) => bail!("unknown delegate '{other}', expected 'cpu' or 'gpu'"),
    };
    let duration = args
        .next()
        .map(|s| s.parse::<u64>().map(Duration::from_secs))
        .transpose()?;

    let config = FeedConfig::from_env(delegate)?.max_resolution(Resolution::RES_720P);
    let mut feed = HandFeed::start(config);

    let published = feed.published();
    let token = feed.cancellation_token();
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(500));
        if token.is_cancelled() {
            break;
        }

        let result = published.landmarks();
        let aspect = published
            .video_resolution()
            .and_then(|res| res.aspect_ratio())
            .unwrap_or(1.0);
        for hand in result.iter() {
            let pointer = HandPointer::new(hand, aspect, 1.0);
            match pointer.target() {
                Some(target) => println!(
                    "{:?} hand points at {:.2}, {:.2}",
                    hand.handedness(),
                    target.x,
                    target.y
                ),
                None => println!("{:?} hand, thumb not visible", hand.handedness()),
            }
        }
        match published.to_json() {
            Ok(json) => log::debug!("{json}"),
            Err(e) => log::error!("failed to serialize landmarks: {e}"),
        }
    });

    if let Some(duration) = duration {
        let token = feed.cancellation_token();
        thread::spawn(move || {
            thread::sleep(duration);
            token.cancel();
        });
    }

    feed.run();
    Ok(())
}
