pub mod georeference;
pub mod parcel;
pub mod raster;
