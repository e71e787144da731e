use proto::crypto::{Address, ChannelId};

use crate::channel::ChannelState;

/// Read access to the known channels and participants of token networks, and to the set of
/// token networks we are leaving.
pub trait ChannelGraph: Send + Sync {
    /// All nodes known to participate in a token network, ourselves included.
    fn participants(&self, token_network: &Address) -> Vec<Address>;

    /// All our channels in a token network, sorted by channel id.
    fn channels(&self, token_network: &Address) -> Vec<ChannelState>;

    /// Our channels in a token network that are still open.
    fn open_channels(&self, token_network: &Address) -> Vec<ChannelState>;

    /// Our latest channel with `partner` in a token network, whatever its status.
    fn channel_by_partner(&self, token_network: &Address, partner: &Address) -> Option<ChannelState>;

    fn channel(&self, channel_id: &ChannelId) -> Option<ChannelState>;

    /// Is the token network blocked from automatic connection?
    fn is_blocked(&self, token_network: &Address) -> bool;

    fn set_blocked(&self, token_network: &Address, blocked: bool);
}
