use std::fs::File;
use std::io::{stdin, Read};

use desk_link::{TelemetryDecoder, TelemetryEvent};

fn main() -> std::io::Result<()> {
    env_logger::init();
    let mut pargs = pico_args::Arguments::from_env();

    // Raw capture of the desk's serial output; stdin when no file is given.
    let path: Option<String> = pargs.opt_value_from_str("--file").unwrap();
    let mut input: Box<dyn Read> = match path {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(stdin().lock()),
    };

    let mut decoder = TelemetryDecoder::new();
    let mut buf = [0u8; 256];
    loop {
        let len = input.read(&mut buf)?;
        if len == 0 {
            break;
        }

        for event in decoder.feed(&buf[..len]) {
            match event {
                TelemetryEvent::Height(mm) => println!("height {mm} mm"),
                TelemetryEvent::State(state) => println!("state  {state}"),
                TelemetryEvent::Ignored(line) => println!("ignored {:?}", line.as_str()),
            }
        }
    }

    if decoder.buffered() > 0 {
        eprintln!("{} trailing bytes without \\r\\n", decoder.buffered());
    }

    Ok(())
}
