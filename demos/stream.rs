use std::{env, thread, time::Duration};

use uvcstream::{Config, LibusbTransport, StreamPreferences, VideoDevice};

fn parse_id(arg: Option<String>) -> Option<u16> {
    u16::from_str_radix(arg?.trim_start_matches("0x"), 16).ok()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let (vendor_id, product_id) = match (parse_id(args.next()), parse_id(args.next())) {
        (Some(vid), Some(pid)) => (vid, pid),
        _ => {
            eprintln!("usage: stream <vendor id> <product id>");
            return Ok(());
        }
    };

    let device = VideoDevice::new(
        LibusbTransport::open(vendor_id, product_id)?,
        Config::default(),
    )?;
    for stream in device.streaming_interface().matching_streams(&StreamPreferences::default()) {
        println!("{:?}", stream);
    }

    device.start(&StreamPreferences::new().resolution(640, 480).frame_rate(30.0))?;
    println!("stream started");

    loop {
        match device.next_sample() {
            Some((sample, queued)) => {
                println!("{:?} ({} more queued)", sample, queued);
                device.give_sample_back(sample);
            }
            None => thread::sleep(Duration::from_millis(5)),
        }
    }
}
