//! Column metadata: field and row descriptors.

/// Wire type tags. Odd values mark nullable columns; see [`FieldDescriptor::base_type`].
pub mod sql_type {
    /// Variable-length character data.
    pub const SQL_VARYING: i32 = 448;
    /// Fixed-length character data.
    pub const SQL_TEXT: i32 = 452;
    /// Double precision float.
    pub const SQL_DOUBLE: i32 = 480;
    /// Single precision float.
    pub const SQL_FLOAT: i32 = 482;
    /// 32-bit integer.
    pub const SQL_LONG: i32 = 496;
    /// 16-bit integer.
    pub const SQL_SHORT: i32 = 500;
    /// Timestamp.
    pub const SQL_TIMESTAMP: i32 = 510;
    /// Blob id.
    pub const SQL_BLOB: i32 = 520;
    /// VAX double.
    pub const SQL_D_FLOAT: i32 = 530;
    /// Array id.
    pub const SQL_ARRAY: i32 = 540;
    /// Quad word.
    pub const SQL_QUAD: i32 = 550;
    /// Time of day.
    pub const SQL_TYPE_TIME: i32 = 560;
    /// Date.
    pub const SQL_TYPE_DATE: i32 = 570;
    /// 64-bit integer.
    pub const SQL_INT64: i32 = 580;
    /// Boolean.
    pub const SQL_BOOLEAN: i32 = 32764;
    /// Untyped null.
    pub const SQL_NULL: i32 = 32766;
}

/// Metadata of one column or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    type_tag: i32,
    sub_type: i32,
    scale: i32,
    length: i32,
    field_name: Option<String>,
    relation_name: Option<String>,
}

impl FieldDescriptor {
    /// Create a descriptor from the raw wire attributes.
    #[must_use]
    pub fn new(type_tag: i32, sub_type: i32, scale: i32, length: i32) -> Self {
        Self {
            type_tag,
            sub_type,
            scale,
            length,
            field_name: None,
            relation_name: None,
        }
    }

    /// Attach the column and table names.
    #[must_use]
    pub fn with_names(mut self, field_name: impl Into<String>, relation_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self.relation_name = Some(relation_name.into());
        self
    }

    /// Raw type tag including the nullable bit.
    #[must_use]
    pub fn type_tag(&self) -> i32 {
        self.type_tag
    }

    /// Type tag with the nullable bit cleared.
    #[must_use]
    pub fn base_type(&self) -> i32 {
        self.type_tag & !1
    }

    /// Whether the column accepts nulls.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.type_tag & 1 == 1
    }

    /// Subtype (blob subtype, character set for text).
    #[must_use]
    pub fn sub_type(&self) -> i32 {
        self.sub_type
    }

    /// Power-of-ten exponent for exact numerics.
    #[must_use]
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Declared byte length.
    #[must_use]
    pub fn length(&self) -> i32 {
        self.length
    }

    /// Column name, when known.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// Table name, when known.
    #[must_use]
    pub fn relation_name(&self) -> Option<&str> {
        self.relation_name.as_deref()
    }
}

/// Ordered, immutable list of field descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowDescriptor {
    fields: Vec<FieldDescriptor>,
}

impl RowDescriptor {
    /// Row without columns.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a row descriptor.
    #[must_use]
    pub fn builder() -> RowDescriptorBuilder {
        RowDescriptorBuilder::default()
    }

    /// Number of columns.
    #[must_use]
    pub fn count(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Descriptor at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    /// Iterate over the descriptors in column order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }
}

impl From<Vec<FieldDescriptor>> for RowDescriptor {
    fn from(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }
}

impl<'a> IntoIterator for &'a RowDescriptor {
    type Item = &'a FieldDescriptor;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Builder for [`RowDescriptor`].
#[derive(Debug, Default)]
pub struct RowDescriptorBuilder {
    fields: Vec<FieldDescriptor>,
}

impl RowDescriptorBuilder {
    /// Append a column.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Append a column from its raw attributes.
    #[must_use]
    pub fn column(self, type_tag: i32, sub_type: i32, scale: i32, length: i32) -> Self {
        self.field(FieldDescriptor::new(type_tag, sub_type, scale, length))
    }

    /// Finish the row descriptor.
    #[must_use]
    pub fn build(self) -> RowDescriptor {
        RowDescriptor {
            fields: self.fields,
        }
    }
}
