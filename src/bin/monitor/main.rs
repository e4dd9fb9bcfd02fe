//! Live plotting against the emulated chip: end-to-end exercise of the
//! driver, the pipelines, and the save writer with no hardware attached.

mod gui;

use clap::Parser;
use earlink::{
    args::LinkArgs,
    channel_store::ChannelStateStore,
    dummy_link::DummyLinkPort,
    layout_config::load_layout,
    link_driver, pipeline,
    save_writer::SaveWriter,
};
use gui::{engage_gui, Series};

use log::warn;
use std::{
    fs,
    sync::atomic::AtomicBool,
    sync::Arc,
};

fn main() {
    env_logger::init();
    let args = LinkArgs::parse();

    if let Err(err) = fs::create_dir_all(&args.data_dir) {
        eprintln!("could not create {}: {}", args.data_dir.display(), err);
        return;
    }

    let store = Arc::new(ChannelStateStore::new(args.num_channels));
    let running = Arc::new(AtomicBool::new(true));

    let num_channels = args.num_channels;
    let (link, _driver) = link_driver::spawn(
        Box::new(move || Ok(DummyLinkPort::new(num_channels))),
        args.num_channels,
        Arc::clone(&store),
    );
    SaveWriter::new(
        link.records,
        Arc::clone(&running),
        args.data_dir.clone(),
        args.basename.clone(),
        args.num_channels,
    )
    .spawn();

    let pipelines = pipeline::spawn_all(&store, &running, args.window);

    let layout = match load_layout(&args.layout_config) {
        Ok(layout) => layout,
        Err(err) => {
            eprintln!("could not load plot layout: {}", err);
            return;
        }
    };
    let columns: Vec<Vec<Series>> = layout
        .iter()
        .map(|col| {
            col.iter()
                .filter_map(|&idx| match pipelines.get(idx) {
                    Some(p) => Some(Series {
                        name: p.name.clone(),
                        window: Arc::clone(&p.window),
                    }),
                    None => {
                        warn!("layout refers to plot {} which does not exist", idx);
                        None
                    }
                })
                .collect()
        })
        .collect();

    let _ = link.commands.send("start".into());
    if let Err(err) = engage_gui(columns) {
        eprintln!("{}", err);
    }
    let _ = link.commands.send("stop".into());
}
