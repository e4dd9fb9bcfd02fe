//! Operator CLI for the ear-EEG link: connects to the chip, runs the
//! post-processing pipelines and the save writer, and turns stdin lines
//! into device commands.

use clap::Parser;
use earlink::{
    args::LinkArgs,
    channel_store::ChannelStateStore,
    link_driver::{self, LinkEvent, SerialLinkPort},
    pipeline,
    reg_dump::dump_registers,
    save_writer::SaveWriter,
};

use log::{error, warn};
use serial2::SerialPort;
use std::{
    fs, io,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    sync::mpsc::{channel, TryRecvError},
    sync::Arc,
    thread,
    time::Duration,
};

/// Tick of the operator loop; stdin and link events are drained each pass.
const UI_TICK: Duration = Duration::from_millis(50);

fn main() {
    env_logger::init();
    let args = LinkArgs::parse();

    if let Err(err) = fs::create_dir_all(&args.data_dir) {
        error!("could not create {}: {}", args.data_dir.display(), err);
        return;
    }

    let port_path = match args.port.clone() {
        Some(path) => path,
        None => match prompt_for_port() {
            Some(path) => path,
            None => return,
        },
    };

    let store = Arc::new(ChannelStateStore::new(args.num_channels));
    let running = Arc::new(AtomicBool::new(false));

    let connect_path = port_path.clone();
    let (link, _driver) = link_driver::spawn(
        Box::new(move || SerialLinkPort::open(&connect_path)),
        args.num_channels,
        Arc::clone(&store),
    );

    let pipelines = pipeline::spawn_all(&store, &running, args.window);
    SaveWriter::new(
        link.records,
        Arc::clone(&running),
        args.data_dir.clone(),
        args.basename.clone(),
        args.num_channels,
    )
    .spawn();

    // stdin is read on its own thread so the operator loop never blocks.
    let (line_tx, line_rx) = channel::<String>();
    thread::spawn(move || {
        let mut line = String::new();
        while io::stdin().read_line(&mut line).is_ok_and(|n| n > 0) {
            if line_tx.send(line.trim().to_string()).is_err() {
                return;
            }
            line.clear();
        }
    });

    println!("earlink connected to {}", port_path.display());
    println!("commands: start, stop, read reg NN, write reg NN HHHH, dump, resize N, reset, quit");

    loop {
        while let Ok(event) = link.events.try_recv() {
            println!("{}", event);
            if event == LinkEvent::Connected {
                if let Some(path) = &args.startup_commands {
                    send_startup_commands(path, &link.commands);
                }
            }
        }

        loop {
            let line = match line_rx.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            };
            match line.as_str() {
                "" => {}
                "quit" | "exit" => return,
                "start" => {
                    running.store(true, Ordering::Relaxed);
                    let _ = link.commands.send(line);
                }
                "stop" => {
                    let _ = link.commands.send(line);
                    running.store(false, Ordering::Relaxed);
                }
                "dump" => {
                    if running.load(Ordering::Relaxed) {
                        println!("stop streaming before dumping registers");
                    } else if let Err(err) =
                        dump_registers(&link.commands, &link.events, &args.reg_dump)
                    {
                        error!("register dump failed: {}", err);
                    } else {
                        println!("registers appended to {}", args.reg_dump.display());
                    }
                }
                other => {
                    if let Some(len) = other.strip_prefix("resize ") {
                        match len.trim().parse::<usize>() {
                            Ok(len) if len > 0 => {
                                for p in &pipelines {
                                    p.window.lock().unwrap().resize(len);
                                }
                                println!("windows resized to {} packets", len);
                            }
                            _ => println!("usage: resize N"),
                        }
                    } else {
                        // Everything else (including `reset`) goes to the
                        // driver, which validates it.
                        let _ = link.commands.send(line);
                    }
                }
            }
        }

        spin_sleep::sleep(UI_TICK);
    }
}

/// Lists the serial devices on this machine and asks which to use.
fn prompt_for_port() -> Option<PathBuf> {
    let available = match SerialPort::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            error!("failed to list serial ports: {}", err);
            return None;
        }
    };
    println!("Available devices:");
    for port in &available {
        println!("\t{}", port.to_string_lossy());
    }
    println!("Enter the device name: ");

    let mut device_name = String::new();
    if io::stdin().read_line(&mut device_name).is_err() {
        return None;
    }
    let trimmed = device_name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

/// Feeds each non-empty line of `path` to the driver as a command.
fn send_startup_commands(path: &std::path::Path, commands: &std::sync::mpsc::Sender<String>) {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!("could not read startup commands {}: {}", path.display(), err);
            return;
        }
    };
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let _ = commands.send(line.trim().to_string());
    }
}
