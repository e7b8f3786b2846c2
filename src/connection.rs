//! Connection policies: pure index mappings between two ensembles.
//!
//! A policy answers two symmetric questions about a pair of shapes:
//!
//! * forward: which upstream neurons feed a given downstream neuron, and
//! * backward: which downstream neurons consume a given upstream neuron.
//!
//! Each (downstream, upstream) pair also names a weight slot, a flat offset into
//! the parameter buffer the planner allocates for the connection. Policies with
//! shared weights hand out the same slot at every spatial position.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::shape::{Index, Shape};

/// Dimensions of the parameter buffer a connection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamShape {
    pub rows: usize,
    pub cols: usize,
    /// Inputs feeding one output, for initialization scaling.
    pub fan_in: usize,
    /// Outputs fed by one input, for initialization scaling.
    pub fan_out: usize,
}

impl ParamShape {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How downstream neurons share a connection's weight slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeightLayout {
    /// Downstream neuron `d` owns slots `d * stride .. (d + 1) * stride`.
    PerNeuron { stride: usize },
    /// Every downstream neuron addresses the same `len` slots.
    Shared { len: usize },
}

/// Behaviour every connection policy provides.
///
/// Visitors receive `(index, slot)` pairs and allocate nothing. Callers
/// guarantee that the shapes passed in were accepted by [`Topology::validate`]
/// and that the queried index lies inside the relevant shape.
pub trait Topology {
    fn name(&self) -> &'static str;

    fn validate(&self, upstream: Shape, downstream: Shape) -> Result<()>;

    fn param_shape(&self, upstream: Shape, downstream: Shape) -> ParamShape;

    fn layout(&self, upstream: Shape, downstream: Shape) -> WeightLayout;

    /// Visits every upstream neuron contributing to downstream `index`.
    fn visit_upstream(
        &self,
        upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    );

    /// Visits every downstream neuron consuming upstream `index`.
    fn visit_downstream(
        &self,
        upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    );
}

/// One-to-one mapping between equally shaped ensembles, one weight per position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Identity;

impl Topology for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn validate(&self, upstream: Shape, downstream: Shape) -> Result<()> {
        if upstream == downstream {
            Ok(())
        } else {
            Err(Error::IncompatibleShapes {
                policy: self.name(),
                upstream,
                downstream,
            })
        }
    }

    fn param_shape(&self, _upstream: Shape, downstream: Shape) -> ParamShape {
        ParamShape {
            rows: downstream.rows(),
            cols: downstream.cols(),
            fan_in: 1,
            fan_out: 1,
        }
    }

    fn layout(&self, _upstream: Shape, _downstream: Shape) -> WeightLayout {
        WeightLayout::PerNeuron { stride: 1 }
    }

    fn visit_upstream(
        &self,
        _upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        visit(index, downstream.linear(index));
    }

    fn visit_downstream(
        &self,
        _upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        visit(index, downstream.linear(index));
    }
}

/// Every downstream neuron reads every upstream neuron.
///
/// The buffer is `downstream_size x upstream_size`, row-major, so a downstream
/// neuron's weights are one contiguous row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FullyConnected;

impl Topology for FullyConnected {
    fn name(&self) -> &'static str {
        "fully-connected"
    }

    fn validate(&self, _upstream: Shape, _downstream: Shape) -> Result<()> {
        Ok(())
    }

    fn param_shape(&self, upstream: Shape, downstream: Shape) -> ParamShape {
        ParamShape {
            rows: downstream.size(),
            cols: upstream.size(),
            fan_in: upstream.size(),
            fan_out: downstream.size(),
        }
    }

    fn layout(&self, upstream: Shape, _downstream: Shape) -> WeightLayout {
        WeightLayout::PerNeuron {
            stride: upstream.size(),
        }
    }

    fn visit_upstream(
        &self,
        upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        let row = downstream.linear(index) * upstream.size();
        for position in 0..upstream.size() {
            visit(upstream.index_of(position), row + position);
        }
    }

    fn visit_downstream(
        &self,
        upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        let m = upstream.size();
        let col = upstream.linear(index);
        for position in 0..downstream.size() {
            visit(downstream.index_of(position), position * m + col);
        }
    }
}

/// Sliding window with one kernel shared by every output position.
///
/// No padding: the downstream shape is
/// `((up.rows - kernel_rows) / stride_rows + 1, (up.cols - kernel_cols) / stride_cols + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Windowed {
    kernel: (usize, usize),
    stride: (usize, usize),
}

impl Windowed {
    pub fn new(kernel: (usize, usize), stride: (usize, usize)) -> Result<Self> {
        if kernel.0 == 0 || kernel.1 == 0 {
            return Err(Error::InvalidWindow(format!(
                "kernel {}x{} has a zero dimension",
                kernel.0, kernel.1
            )));
        }
        if stride.0 == 0 || stride.1 == 0 {
            return Err(Error::InvalidWindow(format!(
                "stride {}x{} has a zero dimension",
                stride.0, stride.1
            )));
        }
        Ok(Self { kernel, stride })
    }

    /// Square kernel of side `size` moving `stride` in both directions.
    pub fn square(size: usize, stride: usize) -> Result<Self> {
        Self::new((size, size), (stride, stride))
    }

    pub fn kernel(&self) -> (usize, usize) {
        self.kernel
    }

    pub fn stride(&self) -> (usize, usize) {
        self.stride
    }

    /// Shape produced by sliding this window over `upstream`.
    pub fn output_shape(&self, upstream: Shape) -> Result<Shape> {
        let (kr, kc) = self.kernel;
        if kr > upstream.rows() || kc > upstream.cols() {
            return Err(Error::InvalidWindow(format!(
                "kernel {kr}x{kc} does not fit inside {upstream}"
            )));
        }
        Shape::new(
            (upstream.rows() - kr) / self.stride.0 + 1,
            (upstream.cols() - kc) / self.stride.1 + 1,
        )
    }
}

/// Output positions along one axis whose window covers input position `pos`.
fn covering(pos: usize, kernel: usize, stride: usize, out_len: usize) -> std::ops::Range<usize> {
    let lo = if pos >= kernel {
        (pos - kernel) / stride + 1
    } else {
        0
    };
    let hi = (pos / stride).min(out_len - 1) + 1;
    lo..hi.max(lo)
}

impl Topology for Windowed {
    fn name(&self) -> &'static str {
        "windowed"
    }

    fn validate(&self, upstream: Shape, downstream: Shape) -> Result<()> {
        match self.output_shape(upstream) {
            Ok(expected) if expected == downstream => Ok(()),
            _ => Err(Error::IncompatibleShapes {
                policy: self.name(),
                upstream,
                downstream,
            }),
        }
    }

    fn param_shape(&self, _upstream: Shape, _downstream: Shape) -> ParamShape {
        let (kr, kc) = self.kernel;
        ParamShape {
            rows: kr,
            cols: kc,
            fan_in: kr * kc,
            fan_out: kr * kc,
        }
    }

    fn layout(&self, _upstream: Shape, _downstream: Shape) -> WeightLayout {
        WeightLayout::Shared {
            len: self.kernel.0 * self.kernel.1,
        }
    }

    fn visit_upstream(
        &self,
        _upstream: Shape,
        _downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        let (kr, kc) = self.kernel;
        let (sr, sc) = self.stride;
        for i in 0..kr {
            for j in 0..kc {
                visit(
                    Index::new(index.row * sr + i, index.col * sc + j),
                    i * kc + j,
                );
            }
        }
    }

    fn visit_downstream(
        &self,
        _upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        let (kr, kc) = self.kernel;
        let (sr, sc) = self.stride;
        for row in covering(index.row, kr, sr, downstream.rows()) {
            for col in covering(index.col, kc, sc, downstream.cols()) {
                let i = index.row - row * sr;
                let j = index.col - col * sc;
                visit(Index::new(row, col), i * kc + j);
            }
        }
    }
}

/// The closed set of connection policies a network accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Connection {
    Identity(Identity),
    FullyConnected(FullyConnected),
    Windowed(Windowed),
}

impl Connection {
    pub fn identity() -> Self {
        Connection::Identity(Identity)
    }

    pub fn fully_connected() -> Self {
        Connection::FullyConnected(FullyConnected)
    }

    pub fn windowed(window: Windowed) -> Self {
        Connection::Windowed(window)
    }

    fn policy(&self) -> &dyn Topology {
        match self {
            Connection::Identity(policy) => policy,
            Connection::FullyConnected(policy) => policy,
            Connection::Windowed(policy) => policy,
        }
    }
}

impl Topology for Connection {
    fn name(&self) -> &'static str {
        self.policy().name()
    }

    fn validate(&self, upstream: Shape, downstream: Shape) -> Result<()> {
        self.policy().validate(upstream, downstream)
    }

    fn param_shape(&self, upstream: Shape, downstream: Shape) -> ParamShape {
        self.policy().param_shape(upstream, downstream)
    }

    fn layout(&self, upstream: Shape, downstream: Shape) -> WeightLayout {
        self.policy().layout(upstream, downstream)
    }

    fn visit_upstream(
        &self,
        upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        self.policy()
            .visit_upstream(upstream, downstream, index, visit)
    }

    fn visit_downstream(
        &self,
        upstream: Shape,
        downstream: Shape,
        index: Index,
        visit: &mut dyn FnMut(Index, usize),
    ) {
        self.policy()
            .visit_downstream(upstream, downstream, index, visit)
    }
}

/// A policy bound to the shapes of the two ensembles it joins.
///
/// Binding validates the shapes once; every query afterwards only checks that
/// the index it is given lies inside the right ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Link {
    policy: Connection,
    upstream: Shape,
    downstream: Shape,
}

impl Link {
    pub fn new(policy: Connection, upstream: Shape, downstream: Shape) -> Result<Self> {
        policy.validate(upstream, downstream)?;
        Ok(Self {
            policy,
            upstream,
            downstream,
        })
    }

    pub fn policy(&self) -> Connection {
        self.policy
    }

    pub fn upstream(&self) -> Shape {
        self.upstream
    }

    pub fn downstream(&self) -> Shape {
        self.downstream
    }

    pub fn param_shape(&self) -> ParamShape {
        self.policy.param_shape(self.upstream, self.downstream)
    }

    pub fn layout(&self) -> WeightLayout {
        self.policy.layout(self.upstream, self.downstream)
    }

    /// Upstream indices feeding downstream `index`.
    pub fn forward(&self, index: Index) -> Result<Vec<Index>> {
        Ok(self
            .forward_slots(index)?
            .into_iter()
            .map(|(up, _)| up)
            .collect())
    }

    /// Downstream indices consuming upstream `index`.
    pub fn backward(&self, index: Index) -> Result<Vec<Index>> {
        Ok(self
            .backward_slots(index)?
            .into_iter()
            .map(|(down, _)| down)
            .collect())
    }

    /// Forward query paired with the weight slot of each contribution.
    pub fn forward_slots(&self, index: Index) -> Result<Vec<(Index, usize)>> {
        self.downstream.check(index)?;
        let mut found = Vec::new();
        self.policy
            .visit_upstream(self.upstream, self.downstream, index, &mut |up, slot| {
                found.push((up, slot))
            });
        Ok(found)
    }

    /// Backward query paired with the weight slot of each contribution.
    pub fn backward_slots(&self, index: Index) -> Result<Vec<(Index, usize)>> {
        self.upstream.check(index)?;
        let mut found = Vec::new();
        self.policy
            .visit_downstream(self.upstream, self.downstream, index, &mut |down, slot| {
                found.push((down, slot))
            });
        Ok(found)
    }

    /// Row-major visitor over the upstream positions of downstream `position`.
    #[inline]
    pub(crate) fn each_upstream(&self, position: usize, mut visit: impl FnMut(usize, usize)) {
        let upstream = self.upstream;
        self.policy.visit_upstream(
            upstream,
            self.downstream,
            self.downstream.index_of(position),
            &mut |up, slot| visit(upstream.linear(up), slot),
        );
    }

    /// Row-major visitor over the downstream positions of upstream `position`.
    #[inline]
    pub(crate) fn each_downstream(&self, position: usize, mut visit: impl FnMut(usize, usize)) {
        let downstream = self.downstream;
        self.policy.visit_downstream(
            self.upstream,
            downstream,
            self.upstream.index_of(position),
            &mut |down, slot| visit(downstream.linear(down), slot),
        );
    }
}
