use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_sync::{
    blocking_mutex::raw::NoopRawMutex,
    pipe::{self, Pipe},
};
use embassy_time::{Duration, Instant, Timer};
use log::{error, info};

use desk_link::{
    fake::{FakeDesk, MAX_HEIGHT, MIN_HEIGHT},
    Command, DeskLink, LinkEvent, Panel, PanelConfig, Preset, TransportEvent,
};

/// Seconds to watch the panel before each command is sent.
const SCRIPT: [(u64, Command); 4] = [
    (1, Command::Preset(Preset::Two)),
    (20, Command::SetHeight(800)),
    (2, Command::Stop),
    (2, Command::Preset(Preset::One)),
];

const SETTLE: Duration = Duration::from_secs(10);

async fn listen_until<F: FnMut(LinkEvent)>(
    link: &mut DeskLink,
    rx: &pipe::Reader<'_, NoopRawMutex, 256>,
    deadline: Instant,
    notify: &mut F,
) {
    let mut buf = [0u8; 64];
    loop {
        let either = select(rx.read(&mut buf), Timer::at(deadline)).await;

        match either {
            Either::First(read_len) => {
                link.handle(TransportEvent::Received(&buf[..read_len]), notify)
            }
            Either::Second(_) => return,
        }
    }
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    env_logger::init();

    let mut to_desk = Pipe::<NoopRawMutex, 256>::new();
    let mut from_desk = Pipe::<NoopRawMutex, 256>::new();
    let (desk_rx, mut host_tx) = to_desk.split();
    let (host_rx, desk_tx) = from_desk.split();

    let mut desk = FakeDesk::new(desk_rx, desk_tx);

    let host = async {
        let mut link = DeskLink::new();
        let mut panel = Panel::new(PanelConfig {
            height_min: u32::from(MIN_HEIGHT),
            height_max: u32::from(MAX_HEIGHT),
        });
        let mut notify = |event: LinkEvent| {
            if panel.observe(event) {
                println!("{panel}");
            }
        };

        link.handle(TransportEvent::Opened, &mut notify);

        for (wait_secs, command) in SCRIPT {
            let deadline = Instant::now() + Duration::from_secs(wait_secs);
            listen_until(&mut link, &host_rx, deadline, &mut notify).await;

            info!("sending {command:?}");
            if let Err(e) = link.send(&mut host_tx, command).await {
                error!("failed to send {command:?}: {e}");
            }
        }

        listen_until(&mut link, &host_rx, Instant::now() + SETTLE, &mut notify).await;
        link.handle(TransportEvent::Closed, &mut notify);
    };

    select(desk.run(), host).await;

    // The std executor never returns on its own.
    info!("script finished");
    std::process::exit(0);
}
