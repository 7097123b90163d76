use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::mpsc;

/// Last location reported by a client. Never read by the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Location {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

enum LocationCommand {
    Update(Location),
    Get(mpsc::Sender<Location>),
}

/// Handle to the thread that owns the last known location.
///
/// Connection threads send updates and queries over a channel; the owner
/// thread exits once every handle has been dropped.
#[derive(Clone)]
pub struct LocationStore {
    tx: mpsc::Sender<LocationCommand>,
}

impl LocationStore {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("skydra-location".to_string())
            .spawn(move || {
                let mut current = Location::default();
                for command in rx {
                    match command {
                        LocationCommand::Update(location) => {
                            log::debug!("location updated");
                            current = location;
                        }
                        LocationCommand::Get(reply) => {
                            let _ = reply.send(current);
                        }
                    }
                }
            })
            .context("spawn location owner thread")?;
        Ok(Self { tx })
    }

    pub fn update(&self, location: Location) -> Result<()> {
        self.tx
            .send(LocationCommand::Update(location))
            .map_err(|_| anyhow!("location owner thread stopped"))
    }

    pub fn get(&self) -> Result<Location> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(LocationCommand::Get(reply_tx))
            .map_err(|_| anyhow!("location owner thread stopped"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("location owner thread stopped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_keeps_latest_update() {
        let store = LocationStore::spawn().unwrap();
        assert_eq!(store.get().unwrap(), Location::default());

        store
            .update(Location {
                lat: Some(51.5),
                lon: Some(-0.12),
            })
            .unwrap();
        let other = store.clone();
        other
            .update(Location {
                lat: Some(48.85),
                lon: Some(2.35),
            })
            .unwrap();
        assert_eq!(
            store.get().unwrap(),
            Location {
                lat: Some(48.85),
                lon: Some(2.35),
            }
        );
    }
}
