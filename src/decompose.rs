//! Parallel mesh generation over slabs of the domain.
//!
//! Every rank samples the same initial point set
//! and keeps the points whose coordinate along the decomposition axis
//! falls into its own slab.
//! Each iteration starts by sending copies of the points near a slab boundary
//! (the halo) to the neighbouring rank,
//! so that both sides triangulate and compute forces from the same neighbourhood.
//! Points carry their index in the initial set as a stable global id.
//!
//! Ranks talk only through the [`Communicator`] trait.
//! [`ChannelCommunicator`] implements it over in-process channels
//! for running ranks as threads.

use nalgebra as na;
use std::sync::mpsc;

use crate::config::GeneratorOptions;
use crate::delaunay;
use crate::error::{
    CommunicationError, ConfigurationError, ConvergenceWarning, GeometryError, MeshError,
};
use crate::generator::{
    finalize_mesh, fixed_points, length_scale, short_bar_points, BarGeometry, GeneratedMesh,
    GenerationReport, GeneratorState, RelaxParams,
};
use crate::improve::MeshQualityImprover;
use crate::mesh::{edges_of, incidence_map};
use crate::sampler::PointSampler;
use crate::sizing::SizingField;

/// Halo width in multiples of the largest size on the slab.
const HALO_FACTOR: f64 = 3.0;

//
// messages
//

/// Protocol step a message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// Halo widths exchanged before the first iteration.
    Setup,
    /// Copies of boundary points.
    Halo,
    /// Points moving to another slab.
    Migrate,
    /// Partial values on their way to rank 0 for a maximum.
    ReduceMax,
    /// Partial values on their way to rank 0 for a sum.
    AllReduceSum,
    /// Values sent out by rank 0.
    Broadcast,
    /// Final point sets on their way to rank 0.
    Gather,
}

/// Identifies a message within the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
    pub op: Op,
    pub iteration: usize,
}

impl Tag {
    pub fn new(op: Op, iteration: usize) -> Self {
        Self { op, iteration }
    }
}

/// Message content.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Scalars(Vec<f64>),
    /// Points with their global ids, coordinates flattened.
    Points { ids: Vec<u64>, coords: Vec<f64> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub tag: Tag,
    pub payload: Payload,
}

/// Point-to-point messaging between the ranks of one run.
///
/// Messages from one source to one destination arrive in the order they were sent.
pub trait Communicator {
    /// Index of this rank.
    fn rank(&self) -> usize;
    /// Number of ranks.
    fn size(&self) -> usize;
    /// Send a message without waiting for it to be received.
    fn send(&self, dest: usize, message: Message) -> Result<(), CommunicationError>;
    /// Block until the next message from `source` arrives.
    fn recv(&self, source: usize) -> Result<Message, CommunicationError>;
}

/// A [`Communicator`] over `std::sync::mpsc` channels, one channel per ordered pair of ranks.
pub struct ChannelCommunicator {
    rank: usize,
    /// indexed by destination
    senders: Vec<mpsc::Sender<Message>>,
    /// indexed by source
    receivers: Vec<mpsc::Receiver<Message>>,
}

impl ChannelCommunicator {
    /// Create the communicators of a world of `size` ranks, in rank order.
    pub fn world(size: usize) -> Result<Vec<Self>, ConfigurationError> {
        if size == 0 {
            return Err(ConfigurationError::NotPositive {
                name: "ranks",
                value: 0.0,
            });
        }
        let mut senders: Vec<Vec<_>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<_>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = mpsc::channel();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }
        Ok(senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| Self {
                rank,
                senders,
                receivers,
            })
            .collect())
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dest: usize, message: Message) -> Result<(), CommunicationError> {
        let tx = self.senders.get(dest).ok_or(CommunicationError::InvalidRank {
            rank: dest,
            size: self.size(),
        })?;
        tx.send(message)
            .map_err(|_| CommunicationError::Disconnected { peer: dest })
    }

    fn recv(&self, source: usize) -> Result<Message, CommunicationError> {
        let rx = self.receivers.get(source).ok_or(CommunicationError::InvalidRank {
            rank: source,
            size: self.size(),
        })?;
        rx.recv()
            .map_err(|_| CommunicationError::Disconnected { peer: source })
    }
}

/// Receive from `source`, failing if the message is not tagged `tag`.
pub fn expect<C: Communicator + ?Sized>(
    comm: &C,
    source: usize,
    tag: Tag,
) -> Result<Payload, CommunicationError> {
    let message = comm.recv(source)?;
    if message.tag != tag {
        return Err(CommunicationError::Desync {
            peer: source,
            expected: format!("{tag:?}"),
            got: format!("{:?}", message.tag),
        });
    }
    Ok(message.payload)
}

fn expect_scalars<C: Communicator + ?Sized>(
    comm: &C,
    source: usize,
    tag: Tag,
) -> Result<Vec<f64>, CommunicationError> {
    match expect(comm, source, tag)? {
        Payload::Scalars(values) => Ok(values),
        Payload::Points { .. } => Err(CommunicationError::Malformed {
            peer: source,
            reason: "expected scalars, got points".into(),
        }),
    }
}

fn expect_points<C: Communicator + ?Sized, const DIM: usize>(
    comm: &C,
    source: usize,
    tag: Tag,
) -> Result<(Vec<u64>, Vec<na::SVector<f64, DIM>>), CommunicationError> {
    let Payload::Points { ids, coords } = expect(comm, source, tag)? else {
        return Err(CommunicationError::Malformed {
            peer: source,
            reason: "expected points, got scalars".into(),
        });
    };
    if coords.len() != ids.len() * DIM {
        return Err(CommunicationError::Malformed {
            peer: source,
            reason: format!("{} coordinates for {} points", coords.len(), ids.len()),
        });
    }
    let points = coords
        .chunks_exact(DIM)
        .map(|c| na::SVector::from_column_slice(c))
        .collect();
    Ok((ids, points))
}

fn points_payload<const DIM: usize>(ids: Vec<u64>, points: &[na::SVector<f64, DIM>]) -> Payload {
    let coords = points.iter().flat_map(|p| p.iter().copied()).collect();
    Payload::Points { ids, coords }
}

/// Send `values` from rank 0 to every rank. Returns the values on every rank.
pub fn broadcast<C: Communicator + ?Sized>(
    comm: &C,
    values: Vec<f64>,
    iteration: usize,
) -> Result<Vec<f64>, CommunicationError> {
    let tag = Tag::new(Op::Broadcast, iteration);
    if comm.rank() == 0 {
        for dest in 1..comm.size() {
            comm.send(
                dest,
                Message {
                    tag,
                    payload: Payload::Scalars(values.clone()),
                },
            )?;
        }
        Ok(values)
    } else {
        expect_scalars(comm, 0, tag)
    }
}

/// Maximum of `value` over all ranks, known to rank 0 only.
pub fn reduce_max<C: Communicator + ?Sized>(
    comm: &C,
    value: f64,
    iteration: usize,
) -> Result<Option<f64>, CommunicationError> {
    let tag = Tag::new(Op::ReduceMax, iteration);
    if comm.rank() != 0 {
        comm.send(
            0,
            Message {
                tag,
                payload: Payload::Scalars(vec![value]),
            },
        )?;
        return Ok(None);
    }
    let mut max = value;
    for source in 1..comm.size() {
        let values = expect_scalars(comm, source, tag)?;
        let [v] = values[..] else {
            return Err(CommunicationError::Malformed {
                peer: source,
                reason: format!("{} values in a scalar reduction", values.len()),
            });
        };
        max = max.max(v);
    }
    Ok(Some(max))
}

/// Elementwise sum of `values` over all ranks, known to every rank.
pub fn all_reduce_sum<C: Communicator + ?Sized>(
    comm: &C,
    values: &[f64],
    iteration: usize,
) -> Result<Vec<f64>, CommunicationError> {
    let tag = Tag::new(Op::AllReduceSum, iteration);
    if comm.rank() != 0 {
        comm.send(
            0,
            Message {
                tag,
                payload: Payload::Scalars(values.to_vec()),
            },
        )?;
        return broadcast(comm, Vec::new(), iteration);
    }
    let mut sums = values.to_vec();
    for source in 1..comm.size() {
        let part = expect_scalars(comm, source, tag)?;
        if part.len() != sums.len() {
            return Err(CommunicationError::Malformed {
                peer: source,
                reason: format!("expected {} values, got {}", sums.len(), part.len()),
            });
        }
        for (s, v) in sums.iter_mut().zip(part) {
            *s += v;
        }
    }
    broadcast(comm, sums, iteration)
}

/// Collect every rank's points on rank 0, sorted by global id.
pub fn gather_points<C: Communicator + ?Sized, const DIM: usize>(
    comm: &C,
    ids: &[u64],
    points: &[na::SVector<f64, DIM>],
    iteration: usize,
) -> Result<Option<(Vec<u64>, Vec<na::SVector<f64, DIM>>)>, CommunicationError> {
    let tag = Tag::new(Op::Gather, iteration);
    if comm.rank() != 0 {
        comm.send(
            0,
            Message {
                tag,
                payload: points_payload(ids.to_vec(), points),
            },
        )?;
        return Ok(None);
    }
    let mut all: Vec<(u64, na::SVector<f64, DIM>)> =
        ids.iter().copied().zip(points.iter().copied()).collect();
    for source in 1..comm.size() {
        let (ids, points) = expect_points::<C, DIM>(comm, source, tag)?;
        all.extend(ids.into_iter().zip(points));
    }
    all.sort_by_key(|(id, _)| *id);
    Ok(Some(all.into_iter().unzip()))
}

//
// slabs
//

/// Interior slab boundaries along `axis` giving every rank an equal share of `points`.
/// A point belongs to the slab whose range `[cut[r-1], cut[r])` contains it.
pub fn slab_cuts<const DIM: usize>(
    points: &[na::SVector<f64, DIM>],
    axis: usize,
    ranks: usize,
) -> Vec<f64> {
    let mut coords: Vec<f64> = points.iter().map(|p| p[axis]).collect();
    coords.sort_by(f64::total_cmp);
    let n = coords.len();
    (1..ranks)
        .map(|k| {
            let i = k * n / ranks;
            match i {
                _ if n == 0 => 0.0,
                0 => coords[0],
                i if i >= n => coords[n - 1],
                i => 0.5 * (coords[i - 1] + coords[i]),
            }
        })
        .collect()
}

/// The points one rank owns.
struct Partition<const DIM: usize> {
    rank: usize,
    axis: usize,
    cuts: Vec<f64>,
    ids: Vec<u64>,
    points: Vec<na::SVector<f64, DIM>>,
}

impl<const DIM: usize> Partition<DIM> {
    fn owner(&self, p: &na::SVector<f64, DIM>) -> usize {
        self.cuts.partition_point(|c| *c <= p[self.axis])
    }

    fn lower_neighbour(&self) -> Option<usize> {
        self.rank.checked_sub(1)
    }

    fn upper_neighbour(&self) -> Option<usize> {
        (self.rank < self.cuts.len()).then_some(self.rank + 1)
    }

    /// Owned points within `width` of the boundary shared with `neighbour`.
    fn near_boundary(&self, neighbour: usize, width: f64) -> (Vec<u64>, Vec<na::SVector<f64, DIM>>) {
        let axis = self.axis;
        let below = neighbour < self.rank;
        let cut = if below {
            self.cuts[self.rank - 1]
        } else {
            self.cuts[self.rank]
        };
        self.ids
            .iter()
            .zip(&self.points)
            .filter(|(_, p)| {
                if below {
                    p[axis] < cut + width
                } else {
                    p[axis] >= cut - width
                }
            })
            .map(|(id, p)| (*id, *p))
            .unzip()
    }

    /// Remove points that left the slab, returning them grouped by the neighbour they go to.
    /// Points beyond a neighbour's slab are handed to that neighbour and keep travelling.
    fn emigrants(&mut self) -> [(Vec<u64>, Vec<na::SVector<f64, DIM>>); 2] {
        let mut out: [(Vec<u64>, Vec<na::SVector<f64, DIM>>); 2] = Default::default();
        let mut keep_ids = Vec::with_capacity(self.ids.len());
        let mut keep_points = Vec::with_capacity(self.points.len());
        for (id, p) in self.ids.iter().zip(&self.points) {
            let owner = self.owner(p);
            if owner == self.rank {
                keep_ids.push(*id);
                keep_points.push(*p);
            } else {
                let side = usize::from(owner > self.rank);
                out[side].0.push(*id);
                out[side].1.push(*p);
            }
        }
        self.ids = keep_ids;
        self.points = keep_points;
        out
    }

    fn remove(&mut self, local: &[usize]) {
        let mut keep = vec![true; self.ids.len()];
        for i in local {
            keep[*i] = false;
        }
        (self.ids, self.points) = self
            .ids
            .iter()
            .zip(&self.points)
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|((id, p), _)| (*id, *p))
            .unzip();
    }
}

/// Triangulate owned and halo points together.
///
/// Of two coincident points the one with the larger id is dropped,
/// for good if this rank owns it and for this iteration if it is a halo copy.
/// Returns the cells, the new number of owned points and how many owned points were dropped.
fn triangulate_local<const DIM: usize>(
    part: &mut Partition<DIM>,
    ids: &mut Vec<u64>,
    points: &mut Vec<na::SVector<f64, DIM>>,
    mut n_owned: usize,
    nfix: u64,
) -> Result<(Vec<usize>, usize, usize), GeometryError> {
    let mut dropped = 0;
    loop {
        match delaunay::triangulate(points) {
            Ok(cells) => return Ok((cells, n_owned, dropped)),
            Err(GeometryError::CoincidentPoints { first, second }) => {
                let victim = if ids[first] > ids[second] {
                    first
                } else {
                    second
                };
                // fixed ids come first, so a fixed victim means both are fixed
                if ids[victim] < nfix {
                    return Err(GeometryError::CoincidentPoints { first, second });
                }
                ids.remove(victim);
                points.remove(victim);
                if victim < n_owned {
                    part.ids.remove(victim);
                    part.points.remove(victim);
                    n_owned -= 1;
                    dropped += 1;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

//
// driver
//

/// Mesh generator that runs on every rank of a [`Communicator`].
#[derive(Clone, Debug)]
pub struct DomainDecomposer<'a, const DIM: usize> {
    sizing: &'a SizingField<DIM>,
    options: GeneratorOptions,
}

impl<'a, const DIM: usize> DomainDecomposer<'a, DIM> {
    pub fn new(sizing: &'a SizingField<DIM>, options: GeneratorOptions) -> Self {
        Self { sizing, options }
    }

    /// Run this rank's share of the generation.
    ///
    /// Every rank of `comm` must call this with the same sizing field and options.
    /// Rank 0 returns the assembled mesh, the others return `None`.
    pub fn build<C: Communicator + ?Sized>(
        &self,
        comm: &C,
    ) -> Result<Option<GeneratedMesh<DIM>>, MeshError> {
        self.options.validate::<DIM>()?;
        let (rank, size) = (comm.rank(), comm.size());
        if rank >= size {
            return Err(CommunicationError::InvalidRank { rank, size }.into());
        }
        let _span = tracing::info_span!("parallel_generation", rank, size, dim = DIM).entered();

        let params = RelaxParams::new(self.sizing, &self.options);
        let fixed = fixed_points(self.sizing, &self.options)?;
        let nfix = fixed.len() as u64;
        let initial = PointSampler::new(self.sizing, self.options.seed).sample(&fixed);
        let total = initial.len();

        let axis = self.options.axis;
        let cuts = slab_cuts(&initial, axis, size);
        let mut part = Partition {
            rank,
            axis,
            cuts,
            ids: Vec::new(),
            points: Vec::new(),
        };
        for (id, p) in initial.into_iter().enumerate() {
            if part.owner(&p) == rank {
                part.ids.push(id as u64);
                part.points.push(p);
            }
        }
        tracing::info!(owned = part.ids.len(), total, "slab assigned");

        let local_h = part
            .points
            .iter()
            .map(|p| self.sizing.at(p))
            .fold(self.sizing.hmin(), f64::max);
        let halo = self.exchange_widths(comm, &part, HALO_FACTOR * local_h)?;

        let mut iteration = 0;
        let mut max_displacement = f64::INFINITY;
        let mut removed = 0usize;
        let mut termination = GeneratorState::MaxIterReached;
        while iteration < params.max_iter {
            // halo exchange
            let halo_tag = Tag::new(Op::Halo, iteration);
            for (neighbour, width) in &halo {
                let (ids, points) = part.near_boundary(*neighbour, *width);
                comm.send(
                    *neighbour,
                    Message {
                        tag: halo_tag,
                        payload: points_payload(ids, &points),
                    },
                )?;
            }
            let n_owned = part.ids.len();
            let mut ids = part.ids.clone();
            let mut points = part.points.clone();
            for (neighbour, _) in &halo {
                let (h_ids, h_points) = expect_points::<C, DIM>(comm, *neighbour, halo_tag)?;
                ids.extend(h_ids);
                points.extend(h_points);
            }

            // local topology
            let (cells, n_owned, dropped) =
                triangulate_local(&mut part, &mut ids, &mut points, n_owned, nfix)?;
            removed += dropped;
            let bars: Vec<[usize; 2]> = edges_of::<DIM>(&cells)
                .into_iter()
                .filter(|[a, b]| *a < n_owned || *b < n_owned)
                .collect();
            let geometry = BarGeometry::new(&points, &bars, self.sizing);
            let (sum_l, sum_h) = geometry.power_sums(|i| {
                let [a, b] = bars[i];
                let lower = if ids[a] < ids[b] { a } else { b };
                lower < n_owned
            });
            let sums = all_reduce_sum(comm, &[sum_l, sum_h], iteration)?;
            let (sum_l, sum_h) = match sums[..] {
                [l, h] => (l, h),
                _ => {
                    return Err(CommunicationError::Malformed {
                        peer: 0,
                        reason: format!("{} values in a length sum", sums.len()),
                    }
                    .into())
                }
            };
            let scale = length_scale::<DIM>(sum_l, sum_h, params.fscale);

            let period = params.density_control_period;
            let culled: Vec<usize> = if period > 0 && iteration > 0 && iteration % period == 0 {
                short_bar_points(&bars, &geometry, scale, 0)
                    .into_iter()
                    .filter(|i| *i < n_owned && ids[*i] >= nfix)
                    .collect()
            } else {
                Vec::new()
            };

            let local_max = if culled.is_empty() {
                let net = &incidence_map(points.len(), &bars).transpose() * &geometry.forces(scale);
                let domain = self.sizing.domain();
                let mut local_max: f64 = 0.0;
                for (i, p) in part.points.iter_mut().enumerate() {
                    if part.ids[i] < nfix {
                        continue;
                    }
                    let step = na::SVector::<f64, DIM>::from_fn(|axis, _| {
                        params.time_step * net[(i, axis)]
                    });
                    let moved = domain.project(&(*p + step));
                    local_max = local_max.max((moved - *p).norm() / self.sizing.at(&moved));
                    *p = moved;
                }
                local_max
            } else {
                tracing::debug!(iteration, removed = culled.len(), "density control");
                removed += culled.len();
                part.remove(&culled);
                f64::INFINITY
            };

            // migration
            let migrate_tag = Tag::new(Op::Migrate, iteration);
            let [down, up] = part.emigrants();
            for (neighbour, (ids, points)) in
                [(part.lower_neighbour(), down), (part.upper_neighbour(), up)]
            {
                if let Some(n) = neighbour {
                    comm.send(
                        n,
                        Message {
                            tag: migrate_tag,
                            payload: points_payload(ids, &points),
                        },
                    )?;
                }
            }
            for neighbour in [part.lower_neighbour(), part.upper_neighbour()]
                .into_iter()
                .flatten()
            {
                let (ids, points) = expect_points::<C, DIM>(comm, neighbour, migrate_tag)?;
                part.ids.extend(ids);
                part.points.extend(points);
            }

            // convergence
            iteration += 1;
            let global = reduce_max(comm, local_max, iteration)?;
            let decision = broadcast(comm, global.map(|m| vec![m]).unwrap_or_default(), iteration)?;
            max_displacement = decision.first().copied().unwrap_or(f64::INFINITY);
            if rank == 0 && self.options.nscreen > 0 && iteration % self.options.nscreen == 0 {
                tracing::info!(iteration, max_displacement, "relaxation progress");
            }
            if max_displacement < params.tolerance {
                termination = GeneratorState::Converged;
                break;
            }
        }

        tracing::debug!(removed, owned = part.ids.len(), "relaxation finished on rank");
        let gathered = gather_points(comm, &part.ids, &part.points, iteration)?;
        let Some((ids, points)) = gathered else {
            return Ok(None);
        };
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let (mesh, _) = finalize_mesh(points, fixed.len(), self.sizing, params.geps)?;
        let points_removed = total - mesh.num_points();

        let mut warnings = Vec::new();
        if termination == GeneratorState::MaxIterReached {
            let warning = ConvergenceWarning::MaxIterReached {
                iterations: iteration,
                max_displacement,
            };
            tracing::warn!(%warning);
            warnings.push(warning);
        }
        let (mesh, improvement) = if self.options.mesh_improvement {
            let improver = MeshQualityImprover::new(self.sizing, &self.options);
            let (mesh, report) = improver.improve(mesh, fixed.len())?;
            warnings.extend(report.warning.clone());
            (mesh, Some(report))
        } else {
            (mesh, None)
        };
        let quality = mesh.quality(self.options.min_dh_bound, self.options.max_dh_bound);
        tracing::info!(
            points = mesh.num_points(),
            cells = mesh.num_cells(),
            "parallel mesh assembled"
        );

        Ok(Some(GeneratedMesh {
            mesh,
            report: GenerationReport {
                termination,
                iterations: iteration,
                max_displacement,
                retriangulations: iteration + 1,
                points_removed,
                quality,
                improvement,
                warnings,
            },
        }))
    }

    /// Agree with each neighbour on the halo width of the shared boundary.
    /// Returns `(neighbour, width)` pairs, lower neighbour first.
    fn exchange_widths<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        part: &Partition<DIM>,
        width: f64,
    ) -> Result<Vec<(usize, f64)>, CommunicationError> {
        let tag = Tag::new(Op::Setup, 0);
        let neighbours: Vec<usize> = [part.lower_neighbour(), part.upper_neighbour()]
            .into_iter()
            .flatten()
            .collect();
        for n in &neighbours {
            comm.send(
                *n,
                Message {
                    tag,
                    payload: Payload::Scalars(vec![width]),
                },
            )?;
        }
        neighbours
            .into_iter()
            .map(|n| -> Result<(usize, f64), CommunicationError> {
                let theirs = expect_scalars(comm, n, tag)?;
                let w = theirs.first().copied().unwrap_or(width);
                Ok((n, width.max(w)))
            })
            .collect()
    }
}
