//! Named privacy policies that expand into rule lists.

use crate::entity::{Edge, Object};
use crate::rules::edge::{
    self as edge_rules, AllowEndpointCreator, AllowEndpointObjects, AllowViewerEndpoint, Endpoint,
    EndpointMatch,
};
use crate::rules::object::{
    self as object_rules, AllowViewerEdge, AllowViewerIsCreator, AllowViewerIsSelf,
};
use crate::rules::{rule, AlwaysAllow, AlwaysDeny, Privacy, RuleList};
use crate::types::TypeCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectPolicy {
    /// Anyone sees; nobody writes.
    Public,
    /// The object itself sees and modifies; creation is system-only.
    Profile,
    /// Self or creator sees; nobody writes.
    Viewer,
    /// Self or creator sees, and whoever sees may write.
    ViewerWrite,
    /// Anyone sees; self or creator writes.
    PublicViewerWrite,
    /// Self, creator, or anything linked to the viewer by `edges` sees;
    /// anyone creates; whoever sees modifies.
    ViewerEdge(Vec<TypeCode>),
    /// Anyone sees and creates; self, creator or a linked viewer modifies.
    PublicViewerEdge(Vec<TypeCode>),
}

impl ObjectPolicy {
    pub fn privacy(&self) -> Privacy<Object> {
        let deny = || -> RuleList<Object> { vec![rule(AlwaysDeny)] };
        let allow = || -> RuleList<Object> { vec![rule(AlwaysAllow)] };
        let owner = || -> RuleList<Object> {
            vec![rule(AllowViewerIsSelf), rule(AllowViewerIsCreator)]
        };
        let linked = |edges: &[TypeCode]| -> RuleList<Object> {
            vec![
                rule(AllowViewerIsSelf),
                rule(AllowViewerIsCreator),
                rule(AllowViewerEdge::new(edges)),
            ]
        };
        let if_can_see = || -> RuleList<Object> { vec![rule(object_rules::AllowIfCanSee)] };

        match self {
            ObjectPolicy::Public => Privacy::new(allow(), deny(), deny()),
            ObjectPolicy::Profile => {
                Privacy::new(vec![rule(AllowViewerIsSelf)], deny(), vec![rule(AllowViewerIsSelf)])
            }
            ObjectPolicy::Viewer => Privacy::new(owner(), deny(), deny()),
            ObjectPolicy::ViewerWrite => Privacy::new(owner(), if_can_see(), if_can_see()),
            ObjectPolicy::PublicViewerWrite => Privacy::new(allow(), owner(), owner()),
            ObjectPolicy::ViewerEdge(edges) => Privacy::new(linked(edges), allow(), if_can_see()),
            ObjectPolicy::PublicViewerEdge(edges) => {
                Privacy::new(allow(), allow(), linked(edges))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgePolicy {
    /// Anyone sees; nobody writes.
    Public,
    /// Either endpoint sees; nobody writes.
    Viewer,
    /// Either endpoint sees and writes.
    ViewerWrite,
    ViewerSource,
    ViewerSourceWrite,
    ViewerDest,
    ViewerDestWrite,
    /// Anyone sees; either endpoint writes.
    PublicViewerWrite,
    /// The creator of either endpoint object does everything.
    ObjectCreatorWrite,
    /// Whoever sees the source object sees; endpoint creators write.
    SourceObjectCreatorWrite,
    /// Whoever sees the destination object sees; endpoint creators write.
    DestObjectCreatorWrite,
}

impl EdgePolicy {
    pub fn privacy(self) -> Privacy<Edge> {
        let deny = || -> RuleList<Edge> { vec![rule(AlwaysDeny)] };
        let allow = || -> RuleList<Edge> { vec![rule(AlwaysAllow)] };
        let endpoint = |e: Endpoint| -> RuleList<Edge> { vec![rule(AllowViewerEndpoint(e))] };
        let if_can_see = || -> RuleList<Edge> { vec![rule(edge_rules::AllowIfCanSee)] };
        let creator = || -> RuleList<Edge> { vec![rule(AllowEndpointCreator)] };

        match self {
            EdgePolicy::Public => Privacy::new(allow(), deny(), deny()),
            EdgePolicy::Viewer => Privacy::new(endpoint(Endpoint::Either), deny(), deny()),
            EdgePolicy::ViewerWrite => {
                Privacy::new(endpoint(Endpoint::Either), if_can_see(), if_can_see())
            }
            EdgePolicy::ViewerSource => Privacy::new(endpoint(Endpoint::Source), deny(), deny()),
            EdgePolicy::ViewerSourceWrite => {
                Privacy::new(endpoint(Endpoint::Source), if_can_see(), if_can_see())
            }
            EdgePolicy::ViewerDest => Privacy::new(endpoint(Endpoint::Dest), deny(), deny()),
            EdgePolicy::ViewerDestWrite => {
                Privacy::new(endpoint(Endpoint::Dest), if_can_see(), if_can_see())
            }
            EdgePolicy::PublicViewerWrite => Privacy::new(
                allow(),
                endpoint(Endpoint::Either),
                endpoint(Endpoint::Either),
            ),
            EdgePolicy::ObjectCreatorWrite => Privacy::new(creator(), creator(), creator()),
            EdgePolicy::SourceObjectCreatorWrite => Privacy::new(
                vec![rule(AllowEndpointObjects(EndpointMatch::Source))],
                creator(),
                creator(),
            ),
            EdgePolicy::DestObjectCreatorWrite => Privacy::new(
                vec![rule(AllowEndpointObjects(EndpointMatch::Dest))],
                creator(),
                creator(),
            ),
        }
    }
}
