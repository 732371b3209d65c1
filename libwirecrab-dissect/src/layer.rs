use std::fmt;

use serde::Serialize;

/// OSI layer at which a dissector is registered
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Datalink,
    Network,
    Transport,
    Application,
}

impl Layer {
    /// Layer carried in the payload of this one. Application is the last layer.
    pub fn next(self) -> Option<Layer> {
        match self {
            Layer::Datalink => Some(Layer::Network),
            Layer::Network => Some(Layer::Transport),
            Layer::Transport => Some(Layer::Application),
            Layer::Application => None,
        }
    }

    /// Layer implied by the position of a node in a tree, not counting the `frame` pseudo layer
    pub fn from_depth(depth: usize) -> Layer {
        match depth {
            0 => Layer::Datalink,
            1 => Layer::Network,
            2 => Layer::Transport,
            _ => Layer::Application,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Datalink => "datalink",
            Layer::Network => "network",
            Layer::Transport => "transport",
            Layer::Application => "application",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
