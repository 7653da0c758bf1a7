use crate::image::Mask;

/// Why a frame was pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Script boundary created by `attach`; `exit` and `return` stop here
    Base,
    /// `gosub`, recording which listed destination resolved
    Gosub { destination: usize },
    /// `invoke`
    Invoke,
    /// Loop body; `opener` is the line index of the loop command
    Loop { opener: usize },
}

/// Interpreter activation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: usize,
    pub line: usize,
    pub kind: FrameKind,
    /// Loop iteration index, visible to scripts as `%index`
    pub index: usize,
    /// Resource mask accumulated down the call chain
    pub mask: Mask,
    /// Set once control was handed to an `^error` handler in this frame
    pub trapped: bool,
}

impl Frame {
    pub fn base(header: usize, mask: Mask) -> Self {
        Self {
            header,
            line: 0,
            kind: FrameKind::Base,
            index: 0,
            mask,
            trapped: false,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self.kind, FrameKind::Loop { .. })
    }

    /// Boundary that `return` unwinds to
    pub fn is_call(&self) -> bool {
        matches!(self.kind, FrameKind::Gosub { .. } | FrameKind::Invoke)
    }

    pub fn opener(&self) -> Option<usize> {
        match self.kind {
            FrameKind::Loop { opener } => Some(opener),
            _ => None,
        }
    }
}
