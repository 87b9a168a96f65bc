//! The frame-lifecycle pipeline
//!
//! `Medium` owns all simulation state: stations, link model,
//! interference map, scheduler and the in-flight frame table. Frames go
//! in through [`Medium::ingest`], receive a delivery deadline from the
//! access-category and retry simulation, and come back out of
//! [`Medium::run_due`]/[`Medium::run_next`] as cloned receptions and a
//! transmit-status report.
//!
//! All methods take `&mut self`; the daemon drives the medium from a
//! single task and no internal locking exists.

use crate::frame::{Frame, FrameId, TxRate};
use crate::hwsim::IngressFrame;
use crate::ieee80211::MIN_FRAME_LEN;
use crate::interference::InterferenceMap;
use crate::link::LinkModel;
use crate::per::{pkt_duration, rate_of};
use crate::scheduler::{JobKind, Scheduler};
use crate::station::StationTable;
use crate::daemon::client::ClientId;
use crate::{mac_fmt, CCA_THRESHOLD, INTF_WINDOW_USEC, MOVE_INTERVAL_SEC, NOISE_LEVEL, SNR_DEFAULT};
use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Slot time [usec].
const SLOT_TIME: u64 = 9;
/// Short inter-frame space [usec].
const SIFS: u64 = 16;
/// DCF inter-frame space [usec].
const DIFS: u64 = 2 * SLOT_TIME + SIFS;

/// Per-call signal perturbation hook.
pub trait FadingModel: Send {
    /// Additive SNR adjustment [dB] for one link evaluation.
    fn fading(&mut self, rng: &mut SmallRng) -> i32;
}

/// The default hook: no fading.
#[derive(Debug, Default)]
pub struct NoFading;

impl FadingModel for NoFading {
    fn fading(&mut self, _rng: &mut SmallRng) -> i32 {
        0
    }
}

/// Uniform fade of up to `coefficient` dB off the link SNR.
#[derive(Debug)]
pub struct UniformFading {
    pub coefficient: i32,
}

impl FadingModel for UniformFading {
    fn fading(&mut self, rng: &mut SmallRng) -> i32 {
        if self.coefficient <= 0 {
            return 0;
        }
        -rng.gen_range(0..=self.coefficient)
    }
}

/// One egress effect of a delivery.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A cloned reception for one station's radio.
    Reception {
        station: usize,
        /// Client owning the receiving station, if any; `None` means
        /// broadcast to every registered client.
        client: Option<ClientId>,
        data: Bytes,
        signal: i32,
        rx_rate: u32,
        freq: u32,
    },
    /// Transmit status back to the frame's source client.
    TxStatus {
        client: Option<ClientId>,
        transmitter_hwaddr: [u8; 6],
        flags: u32,
        signal: i32,
        tx_rates: Vec<TxRate>,
        cookie: u64,
    },
}

/// The wireless medium.
pub struct Medium {
    stations: StationTable,
    link: LinkModel,
    intf: Option<InterferenceMap>,
    scheduler: Scheduler,
    frames: std::collections::HashMap<FrameId, Frame>,
    next_frame_id: FrameId,
    fading: Box<dyn FadingModel>,
    rng: SmallRng,
}

impl std::fmt::Debug for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Medium")
            .field("stations", &self.stations.len())
            .field("frames", &self.frames.len())
            .field("interference", &self.intf.is_some())
            .field("now", &self.scheduler.now())
            .finish()
    }
}

impl Medium {
    /// Build a medium over a loaded station table and link model.
    ///
    /// `seed` pins the random stream for deterministic runs; production
    /// passes `None`.
    pub fn new(
        stations: StationTable,
        link: LinkModel,
        enable_interference: bool,
        fading: Box<dyn FadingModel>,
        seed: Option<u64>,
    ) -> Self {
        let mut medium = Self {
            intf: enable_interference.then(|| InterferenceMap::new(stations.len())),
            stations,
            link,
            scheduler: Scheduler::new(),
            frames: std::collections::HashMap::new(),
            next_frame_id: 0,
            fading,
            rng: match seed {
                Some(seed) => SmallRng::seed_from_u64(seed),
                None => SmallRng::from_entropy(),
            },
        };
        if medium.intf.is_some() {
            medium
                .scheduler
                .add(INTF_WINDOW_USEC, JobKind::InterferenceUpdate);
        }
        if medium.movement_active() {
            medium
                .scheduler
                .add(MOVE_INTERVAL_SEC * 1_000_000, JobKind::MoveStations);
        }
        medium
    }

    fn movement_active(&self) -> bool {
        let has_path_loss = matches!(&self.link, LinkModel::Snr(m) if m.path_loss.is_some());
        has_path_loss
            && self
                .stations
                .iter()
                .any(|sta| sta.dir_x != 0.0 || sta.dir_y != 0.0)
    }

    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    pub fn pending_jobs(&self) -> usize {
        self.scheduler.pending_jobs()
    }

    pub fn next_deadline(&mut self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    pub fn stations(&self) -> &StationTable {
        &self.stations
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(&id)
    }

    /// Accept one transmission from a client.
    ///
    /// Protocol errors (short payload, unknown sender) are logged and
    /// swallowed: a lossy medium drops frames, it does not disconnect
    /// radios.
    pub fn ingest(&mut self, ingress: IngressFrame, client: Option<ClientId>) -> Option<FrameId> {
        if ingress.data.len() < MIN_FRAME_LEN {
            tracing::debug!("dropping short frame ({} bytes)", ingress.data.len());
            return None;
        }
        let hdr = crate::ieee80211::Ieee80211Hdr::new(&ingress.data)?;
        let src = hdr.addr2();

        let sender = match self.stations.lookup_by_addr_mut(&src) {
            Some(sender) => sender,
            None => {
                tracing::error!("unable to find sender station {}", mac_fmt(&src));
                return None;
            }
        };
        sender.hwaddr = ingress.transmitter;
        if sender.client.is_none() {
            sender.client = client;
        }
        let sender_index = sender.index;

        let frame = Frame {
            data: ingress.data,
            cookie: ingress.cookie,
            flags: ingress.flags,
            freq: ingress.freq,
            sender: sender_index,
            src_client: client,
            tx_rates: ingress.tx_rates,
            signal: 0,
            duration: 0,
            ac: crate::ieee80211::AcNumber::Be,
            job: None,
            deadline: 0,
        };
        Some(self.queue_frame(frame))
    }

    /// Classify, simulate the retry chain, pick a deadline and enqueue.
    fn queue_frame(&mut self, mut frame: Frame) -> FrameId {
        let hdr = frame
            .header()
            .expect("ingest checked the minimum header length");
        let dest = hdr.addr1();
        let ac = hdr.select_queue();
        frame.ac = ac;

        let sender = frame.sender;
        let data_len = frame.data.len();
        let freq = frame.freq;
        let queue = self
            .stations
            .get(sender)
            .expect("sender resolved at ingest")
            .queue(ac);
        let (cw_min, cw_max) = (queue.cw_min, queue.cw_max);

        let ack_time = pkt_duration(14, rate_of(0, freq)) + SIFS;

        // Receive-side SNR: deferred to delivery for group addresses.
        let dest_station = if crate::ieee80211::is_multicast_ether_addr(&dest) {
            None
        } else {
            self.stations.lookup_by_addr(&dest).map(|sta| sta.index)
        };
        let mut snr = SNR_DEFAULT;
        if let Some(dst) = dest_station {
            snr = self.link.snr(sender, dst) - self.interference_offset(sender, dst)
                + self.fading.fading(&mut self.rng);
        }
        frame.signal = snr + NOISE_LEVEL;

        let noack = frame.noack();

        // Walk the rate chain; in fixed-random mode the draw is made
        // once and reused across every attempt.
        let mut send_time: u64 = 0;
        let mut cw = cw_min as u64;
        let mut choice = self.rng.gen::<f64>();
        let mut acked_at: Option<(usize, i8)> = None;

        'rates: for (i, entry) in frame.tx_rates.iter().enumerate() {
            if entry.idx < 0 {
                break;
            }
            let error_prob = self.link.error_prob(
                snr as f64,
                entry.idx as usize,
                freq,
                data_len,
                sender,
                dest_station,
            );
            for j in 0..entry.count.max(0) {
                send_time += DIFS + pkt_duration(data_len, rate_of(entry.idx as usize, freq));

                // No ACK exchange for management or group frames.
                if noack {
                    acked_at = Some((i, j));
                    break 'rates;
                }

                // Contention backoff from the second attempt on.
                if j > 0 {
                    send_time += (cw * SLOT_TIME) / 2;
                    cw = ((cw << 1) + 1).min(cw_max as u64);
                }

                send_time += ack_time;

                if choice > error_prob {
                    acked_at = Some((i, j));
                    break 'rates;
                }

                if !self.link.fixed_random() {
                    choice = self.rng.gen::<f64>();
                }
            }
        }

        match acked_at {
            Some((i, j)) => {
                frame.tx_rates[i].count = j + 1;
                for later in frame.tx_rates.iter_mut().skip(i + 1) {
                    *later = TxRate::INVALID;
                }
                frame.set_acked();
            }
            // An empty chain on a no-ACK frame still counts as sent.
            None if noack && frame.tx_rates.is_empty() => frame.set_acked(),
            None => {}
        }

        // Delivery starts after every pending frame of equal or higher
        // priority, across all stations.
        let mut target = self.scheduler.now();
        for scan_ac in ac.at_least_as_important() {
            for station in self.stations.iter() {
                if let Some(deadline) = station.queue(scan_ac).peek_last_deadline() {
                    target = target.max(deadline);
                }
            }
        }
        target += send_time;

        frame.duration = send_time;
        frame.deadline = target;

        let id = self.next_frame_id;
        self.next_frame_id += 1;
        frame.job = Some(self.scheduler.add(target, JobKind::DeliverFrame(id)));
        self.stations
            .get_mut(sender)
            .expect("sender resolved at ingest")
            .queue_mut(ac)
            .push_back(id, target);
        self.frames.insert(id, frame);
        id
    }

    fn interference_offset(&mut self, src: usize, dst: usize) -> i32 {
        match &self.intf {
            Some(map) => map.signal_offset(src, dst, &mut self.rng),
            None => 0,
        }
    }

    fn record_interference(&mut self, src: usize, duration: u64, signal: i32) -> bool {
        match &mut self.intf {
            Some(map) => map.record(src, duration as i64, signal),
            None => false,
        }
    }

    /// Fire the next scheduled job, whatever its deadline.
    pub fn run_next(&mut self) -> Vec<Delivery> {
        match self.scheduler.pop_next() {
            Some(job) => self.run_job(job.start, job.kind),
            None => Vec::new(),
        }
    }

    /// Fire every job due at or before `horizon`.
    pub fn run_due(&mut self, horizon: u64) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Some(job) = self.scheduler.pop_due(horizon) {
            out.extend(self.run_job(job.start, job.kind));
        }
        out
    }

    fn run_job(&mut self, start: u64, kind: JobKind) -> Vec<Delivery> {
        match kind {
            JobKind::DeliverFrame(id) => self.deliver(id),
            JobKind::InterferenceUpdate => {
                if let Some(map) = &mut self.intf {
                    map.fold_window();
                }
                self.scheduler
                    .add(start + INTF_WINDOW_USEC, JobKind::InterferenceUpdate);
                Vec::new()
            }
            JobKind::MoveStations => {
                self.move_stations();
                self.scheduler
                    .add(start + MOVE_INTERVAL_SEC * 1_000_000, JobKind::MoveStations);
                Vec::new()
            }
        }
    }

    /// Deliver a fired frame: clone to receivers, then report status.
    fn deliver(&mut self, id: FrameId) -> Vec<Delivery> {
        let mut frame = match self.frames.remove(&id) {
            Some(frame) => frame,
            None => return Vec::new(),
        };
        frame.job = None;
        self.stations
            .get_mut(frame.sender)
            .expect("sender outlives its frames")
            .queue_mut(frame.ac)
            .remove(id);

        let dest = frame.dest().expect("queued frames carry a full header");
        let multicast = crate::ieee80211::is_multicast_ether_addr(&dest);
        let sender = frame.sender;
        let src_addr = self
            .stations
            .get(sender)
            .expect("sender outlives its frames")
            .addr;

        let mut out = Vec::new();

        if frame.acked() {
            let receivers: Vec<(usize, [u8; 6], Option<ClientId>)> = self
                .stations
                .iter()
                .map(|sta| (sta.index, sta.addr, sta.client))
                .collect();

            for (index, addr, client) in receivers {
                if addr == src_addr {
                    continue;
                }

                if multicast {
                    // Reception depends on the reverse link to each
                    // receiver; evaluate it independently.
                    let mut snr =
                        self.link.snr(sender, index) + self.fading.fading(&mut self.rng);
                    let signal = snr + NOISE_LEVEL;
                    if signal < CCA_THRESHOLD {
                        continue;
                    }
                    // A sender quiet enough to interfere drowned its own
                    // frame for this receiver.
                    if self.record_interference(sender, frame.duration, signal) {
                        continue;
                    }
                    snr -= self.interference_offset(sender, index);
                    let rate_idx = frame.tx_rates.first().map_or(0, |r| r.idx.max(0) as usize);
                    let error_prob = self.link.error_prob(
                        snr as f64,
                        rate_idx,
                        frame.freq,
                        frame.data.len(),
                        sender,
                        Some(index),
                    );
                    if self.rng.gen::<f64>() <= error_prob {
                        tracing::debug!(
                            "dropped mcast from {} to {} at receiver",
                            mac_fmt(&src_addr),
                            mac_fmt(&addr)
                        );
                        continue;
                    }
                    out.push(Delivery::Reception {
                        station: index,
                        client,
                        data: frame.data.clone(),
                        signal,
                        rx_rate: 1,
                        freq: frame.freq,
                    });
                } else if addr == dest {
                    if self.record_interference(sender, frame.duration, frame.signal) {
                        continue;
                    }
                    out.push(Delivery::Reception {
                        station: index,
                        client,
                        data: frame.data.clone(),
                        signal: frame.signal,
                        rx_rate: 1,
                        freq: frame.freq,
                    });
                }
            }
        } else {
            self.record_interference(sender, frame.duration, frame.signal);
        }

        let transmitter_hwaddr = self
            .stations
            .get(sender)
            .expect("sender outlives its frames")
            .hwaddr;
        out.push(Delivery::TxStatus {
            client: frame.src_client,
            transmitter_hwaddr,
            flags: frame.flags,
            signal: frame.signal,
            tx_rates: frame.tx_rates,
            cookie: frame.cookie,
        });
        out
    }

    /// Advance stations along their movement vectors and refresh the
    /// path-loss matrix.
    fn move_stations(&mut self) {
        for station in self.stations.iter_mut() {
            station.step_movement();
        }
        if let LinkModel::Snr(model) = &mut self.link {
            let positions: Vec<(f64, f64)> =
                self.stations.iter().map(|sta| (sta.x, sta.y)).collect();
            let tx_powers: Vec<i32> = self.stations.iter().map(|sta| sta.tx_power).collect();
            model.recompute_from_positions(&positions, &tx_powers);
        }
    }

    /// Client went away: dissociate its stations and cancel every frame
    /// it sourced, jobs included.
    pub fn remove_client(&mut self, client: ClientId) {
        for station in self.stations.iter_mut() {
            if station.client == Some(client) {
                station.client = None;
            }
        }

        let mut dropped: Vec<FrameId> = Vec::new();
        {
            let frames = &self.frames;
            for station in self.stations.iter_mut() {
                for queue in station.queues.iter_mut() {
                    dropped.extend(queue.drain_matching(|id| {
                        frames
                            .get(&id)
                            .is_some_and(|frame| frame.src_client == Some(client))
                    }));
                }
            }
        }
        for id in dropped {
            if let Some(frame) = self.frames.remove(&id) {
                if let Some(job) = frame.job {
                    self.scheduler.remove(job);
                }
            }
        }
    }
}
