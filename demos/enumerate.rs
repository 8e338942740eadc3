//! List all connected MYNT EYE sensors.

fn main() {
    env_logger::init();

    match mynteye::list_devices() {
        Ok(devices) => {
            println!("Found {} MYNT EYE device(s):", devices.len());
            for (i, dev) in devices.iter().enumerate() {
                println!(
                    "  [{}] {}  VID={:04X} PID={:04X}  Bus={} Addr={}",
                    i, dev.name, dev.vendor_id, dev.product_id, dev.bus_number, dev.address
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
