// Traversal direction shared by scans, index cursors and bitset iteration.

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn from_desc(desc: bool) -> Self {
        if desc { Order::Desc } else { Order::Asc }
    }

    pub fn is_asc(self) -> bool {
        self == Order::Asc
    }

    pub fn reverse(self) -> Self {
        match self {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        }
    }
}
